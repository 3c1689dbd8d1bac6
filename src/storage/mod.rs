pub mod mirror_db;

pub use mirror_db::MirrorDb;
