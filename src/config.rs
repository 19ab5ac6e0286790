//! Effective database configuration: defaults, the `-config <path>` TOML
//! file accepted on the command line, and the `DB.CFG` JSON snapshot
//! written by `Db::close` / read by `Db::reopen`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::segment::RwMethod;

const CFG_FILE: &str = "DB.CFG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdxMode {
    KeyValueMem,
    KeyOnlyMem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dir_path: PathBuf,
    pub addr: String,
    pub block_size: u64,
    pub rw_method: RwMethod,
    pub idx_mode: IdxMode,
    pub sync: bool,
    pub max_key_size: u64,
    pub max_value_size: u64,
    pub reclaim_threshold: usize,
    pub single_reclaim_threshold: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir_path: PathBuf::from("./stratadb_data"),
            addr: "127.0.0.1:6767".to_string(),
            block_size: 16 * 1024 * 1024,
            rw_method: RwMethod::FileIo,
            idx_mode: IdxMode::KeyValueMem,
            sync: false,
            max_key_size: 1024,
            max_value_size: 8 * 1024 * 1024,
            reclaim_threshold: 2,
            single_reclaim_threshold: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_toml_file(path: &Path) -> Result<Config> {
        let data = std::fs::read_to_string(path)?;
        toml::from_str(&data).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load_cfg_json(dir: &Path) -> Result<Config> {
        let path = dir.join(CFG_FILE);
        if !path.exists() {
            return Err(Error::CfgNotExist(path));
        }
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save_cfg_json(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CFG_FILE);
        let data = serde_json::to_vec_pretty(self).expect("config serializes");
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = Config::default();
        assert!(cfg.block_size > 0);
        assert_eq!(cfg.idx_mode, IdxMode::KeyValueMem);
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = Config::default();
        cfg.save_cfg_json(dir.path()).unwrap();
        let loaded = Config::load_cfg_json(dir.path()).unwrap();
        assert_eq!(loaded.addr, cfg.addr);
    }

    #[test]
    fn reopen_without_cfg_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(Config::load_cfg_json(dir.path()), Err(Error::CfgNotExist(_))));
    }

    #[test]
    fn toml_parses() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stratadb.toml");
        std::fs::write(&path, "dir_path = \"/tmp/x\"\naddr = \"0.0.0.0:7000\"\nblock_size = 4096\nrw_method = \"FileIo\"\nidx_mode = \"KeyOnlyMem\"\nsync = true\nmax_key_size = 100\nmax_value_size = 200\nreclaim_threshold = 1\nsingle_reclaim_threshold = 10\n").unwrap();
        let cfg = Config::from_toml_file(&path).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:7000");
        assert_eq!(cfg.idx_mode, IdxMode::KeyOnlyMem);
    }
}
