use super::{ChainReader, Connector, LogQuery, RawLog};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

pub type HttpProvider = RootProvider<Http<Client>>;

/// JSON-RPC reader over one HTTP endpoint.
pub struct AlloyChainReader {
    provider: HttpProvider,
    endpoint: String,
}

impl AlloyChainReader {
    pub fn connect(endpoint: &str) -> anyhow::Result<Self> {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() {
            anyhow::bail!("empty RPC url");
        }
        let url = trimmed
            .parse()
            .with_context(|| format!("invalid RPC url `{trimmed}`"))?;
        Ok(Self {
            provider: ProviderBuilder::new().on_http(url),
            endpoint: trimmed.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn raw(&self, method: &'static str, params: Value) -> anyhow::Result<Value> {
        let value: Value = self
            .provider
            .raw_request(Cow::Borrowed(method), params)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(value)
    }
}

fn block_tag(block_number: u64) -> String {
    format!("0x{block_number:x}")
}

fn parse_quantity(value: &Value, field: &str) -> anyhow::Result<u64> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("response is missing `{field}`"))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .with_context(|| format!("`{field}` is not a hex quantity: {raw}"))
}

fn parse_hex_bytes(value: &Value, field: &str) -> anyhow::Result<Bytes> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("response is missing `{field}`"))?;
    let decoded = hex::decode(raw.trim_start_matches("0x"))
        .with_context(|| format!("`{field}` is not hex"))?;
    Ok(Bytes::from(decoded))
}

pub(crate) fn raw_log_from_rpc(log: &Log) -> anyhow::Result<RawLog> {
    let block_number = log
        .block_number
        .context("log has no block number (pending logs are not indexed)")?;
    let log_index = log.log_index.context("log has no log index")?;
    let transaction_hash = log.transaction_hash.context("log has no transaction hash")?;
    Ok(RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number,
        log_index,
        transaction_hash,
        transaction_index: log.transaction_index.unwrap_or_default(),
    })
}

#[async_trait]
impl ChainReader for AlloyChainReader {
    async fn block_number(&self) -> anyhow::Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(anyhow::Error::from)
    }

    async fn block_timestamp(&self, number: u64) -> anyhow::Result<Option<u64>> {
        let block = self
            .raw(
                "eth_getBlockByNumber",
                serde_json::json!([block_tag(number), false]),
            )
            .await?;
        if block.is_null() {
            return Ok(None);
        }
        parse_quantity(&block, "timestamp").map(Some)
    }

    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>> {
        let mut filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);
        if let Some(topic1) = query.topic1 {
            filter = filter.topic1(topic1);
        }
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(anyhow::Error::from)?;
        logs.iter().map(raw_log_from_rpc).collect()
    }

    async fn transaction_input(&self, hash: B256) -> anyhow::Result<Option<Bytes>> {
        let tx = self
            .raw("eth_getTransactionByHash", serde_json::json!([hash]))
            .await?;
        if tx.is_null() {
            return Ok(None);
        }
        parse_hex_bytes(&tx, "input").map(Some)
    }

    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes> {
        let raw = self
            .raw(
                "eth_call",
                serde_json::json!([{ "to": to, "data": data }, "latest"]),
            )
            .await?;
        let text = raw.as_str().context("eth_call returned a non-string result")?;
        let decoded =
            hex::decode(text.trim_start_matches("0x")).context("eth_call result is not hex")?;
        Ok(Bytes::from(decoded))
    }

    async fn receipt_status(&self, hash: B256) -> anyhow::Result<Option<bool>> {
        let receipt = self
            .raw("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }
        Ok(Some(parse_quantity(&receipt, "status")? == 1))
    }
}

/// Production connector: one HTTP provider per endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlloyConnector;

impl Connector for AlloyConnector {
    fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ChainReader>> {
        let reader = AlloyChainReader::connect(endpoint)?;
        tracing::info!("[RPC] Connected reader to {}", reader.endpoint());
        Ok(Arc::new(reader))
    }
}
