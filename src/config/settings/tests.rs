use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.protocol, "http");
    assert_eq!(config.embedding.host, "localhost");
    assert_eq!(config.embedding.port, 11434);
    assert_eq!(config.embedding.model, "nomic-embed-text:latest");
    assert_eq!(config.embedding.batch_size, 16);
    assert_eq!(config.embedding.requests_per_minute, 60);
    assert_eq!(config.indexing.checkpoint_multiplier, 8);
    assert!(!config.graph.enabled);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embedding.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.requests_per_minute = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.exclusions = vec!["a[".to_string()];
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidPattern(..))
    ));

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(..))
    ));

    let mut invalid_config = config;
    invalid_config.indexing.num_partitions = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn checkpoint_interval_is_multiple_of_batch_size() {
    let indexing = IndexingConfig {
        checkpoint_multiplier: 2,
        ..IndexingConfig::default()
    };
    assert_eq!(indexing.checkpoint_interval(4), 8);
    assert_eq!(IndexingConfig::default().checkpoint_interval(16), 128);
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.graph.enabled = true;
    config.graph.included_tag_prefixes = vec!["#project".to_string()];
    config.indexing.exclusions = vec!["templates/**".to_string()];

    config.save().expect("should save config");
    let loaded = Config::load(temp_dir.path()).expect("should load config");

    assert_eq!(config, loaded);
}

#[test]
fn missing_file_yields_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let loaded = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(loaded.embedding, EmbeddingConfig::default());
    assert_eq!(loaded.base_dir, temp_dir.path());
}

#[test]
fn partial_file_fills_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[graph]\nenabled = true\nbackend = \"memory\"\n",
    )
    .expect("should write config");

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert!(loaded.graph.enabled);
    assert_eq!(loaded.graph.backend, GraphBackend::Memory);
    assert_eq!(loaded.embedding.batch_size, 16);
}

#[test]
fn settings_updates_are_visible_to_snapshots() {
    let settings = Settings::new(Config::default());
    let reader = settings.clone();

    settings.update(|config| config.embedding.batch_size = 4);

    assert_eq!(reader.snapshot().embedding.batch_size, 4);
}
