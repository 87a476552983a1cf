use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use config::{ConfigError, Map, Source, Value};
use serde::{Deserialize, Serialize};

use pinsync_util::{insert_into_config_map, make_config};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TestConfig {
    port: u16,
    name: String,
    enabled: bool,
}

impl TestConfig {
    fn new() -> Self {
        Self {
            port: 3030,
            name: "default".to_string(),
            enabled: true,
        }
    }
}

impl Source for TestConfig {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut map: Map<String, Value> = Map::default();
        insert_into_config_map(&mut map, "port", self.port as i32);
        insert_into_config_map(&mut map, "name", self.name.clone());
        insert_into_config_map(&mut map, "enabled", self.enabled);
        Ok(map)
    }
}

#[test]
fn test_collect() {
    let default = TestConfig::new();
    let got = default.collect().unwrap();
    assert_eq!(got.get("port").unwrap(), &Value::from(3030));
    assert_eq!(got.get("name").unwrap(), &Value::from("default".to_string()));
    assert_eq!(got.get("enabled").unwrap(), &Value::from(true));
}

#[test]
fn test_make_config_defaults() {
    let got: TestConfig = make_config(
        TestConfig::new(),
        vec![None],
        "PINSYNC_UTIL_TEST_A",
        HashMap::<String, String>::new(),
    )
    .unwrap();
    assert_eq!(got, TestConfig::new());
}

#[test]
fn test_make_config_layers() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&cfg_path).unwrap();
    writeln!(file, "port = 4000").unwrap();
    writeln!(file, "name = \"from_file\"").unwrap();
    drop(file);

    // flags take precedence over the config file, the file over defaults
    let got: TestConfig = make_config(
        TestConfig::new(),
        vec![Some(cfg_path), Some(PathBuf::from("does/not/exist.toml"))],
        "PINSYNC_UTIL_TEST_B",
        HashMap::from([("enabled", "false"), ("name", "from_flag")]),
    )
    .unwrap();

    assert_eq!(got.port, 4000);
    assert_eq!(got.name, "from_flag");
    assert!(!got.enabled);
}
