use std::fs;
use std::path::Path;

fn write_minimal_env_template(file: &mut fs::File) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(file, "# Reality mirror configuration")?;
    writeln!(file)?;
    writeln!(file, "MIRROR_RPC_URL=\"https://rpc.gnosischain.com\"")?;
    writeln!(file, "MIRROR_FALLBACK_RPC_URLS=\"\"")?;
    writeln!(file, "CHAIN_ID=\"100\"")?;
    writeln!(file, "REALITY_MODULE_ADDRESS=\"0x0000000000000000000000000000000000000000\"")?;
    writeln!(file, "MIRROR_DB_PATH=\"mirror.db\"")?;
    writeln!(file)?;
    writeln!(file, "RUST_LOG=\"info,reality_mirror=info\"")?;
    Ok(())
}

/// Parses one `.env` line into a key and an unquoted value.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim().trim_start_matches("export ").trim();
    if key.is_empty() {
        return None;
    }

    let value_no_comment = value.split('#').next().unwrap_or("").trim();
    let parsed = if value_no_comment.len() >= 2
        && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
            || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
    {
        &value_no_comment[1..value_no_comment.len() - 1]
    } else {
        value_no_comment
    };
    Some((key, parsed))
}

fn load_dot_env(path: &Path) {
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read {}: {}", path.display(), e);
            return;
        }
    };

    for (key, value) in content.lines().filter_map(parse_env_line) {
        // Process env wins over the file.
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
    }
}

fn ensure_env_example_exists() {
    let env_example = Path::new(".env.example");
    if !env_example.exists() {
        if let Ok(mut file) = fs::File::create(env_example) {
            let _ = write_minimal_env_template(&mut file);
        }
    }
}

/// Loads `.env` from the working directory and warns about missing required keys.
pub fn harden_env_setup() {
    ensure_env_example_exists();
    load_dot_env(Path::new(".env"));
    for key in ["MIRROR_RPC_URL", "CHAIN_ID", "REALITY_MODULE_ADDRESS"] {
        if std::env::var(key).is_err() {
            eprintln!("[ENV] WARN: {key} is not set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line_variants() {
        assert_eq!(parse_env_line("A=1"), Some(("A", "1")));
        assert_eq!(parse_env_line("export B=\"two\""), Some(("B", "two")));
        assert_eq!(parse_env_line("C='x' # note"), Some(("C", "x")));
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line("no_equals_sign"), None);
        assert_eq!(parse_env_line("   "), None);
    }
}
