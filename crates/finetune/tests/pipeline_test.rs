use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use finetune::config::{DataConfig, FinetuneConfig, IntervalStrategy, TrainingArguments, DEFAULT_PROMPT_TEMPLATE};
use finetune::pipeline;
use llm_core::{CausalLm, CausalLmConfig};
use std::path::Path;

const WORDS: &[&str] = &[
    "<|", "|>", "user", "assistant", "Käännä", "suomeksi", ":", "good", "morning", "thank", "you",
    "yes", "no", "Hyvää", "huomenta", "kiitos", "kyllä", "ei", "the", "house", "talo",
];

const PAIRS: &[(&str, &str)] = &[
    ("good morning", "Hyvää huomenta"),
    ("thank you", "kiitos"),
    ("yes", "kyllä"),
    ("no", "ei"),
    ("the house", "talo"),
];

fn write_tokenizer(path: &Path) -> Result<()> {
    let mut vocab = serde_json::Map::new();
    vocab.insert("<unk>".to_string(), 0.into());
    vocab.insert("<pad>".to_string(), 1.into());
    for w in WORDS {
        let id = vocab.len();
        vocab.insert(w.to_string(), id.into());
    }
    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    });
    std::fs::write(path, json.to_string())?;
    Ok(())
}

/// Tiny random-weight llama checkpoint in Hugging Face layout.
fn write_model(dir: &Path) -> Result<()> {
    let config = serde_json::json!({
        "architectures": ["LlamaForCausalLM"],
        "model_type": "llama",
        "vocab_size": 32,
        "hidden_size": 16,
        "intermediate_size": 32,
        "num_hidden_layers": 2,
        "num_attention_heads": 4,
        "num_key_value_heads": 2,
        "max_position_embeddings": 64,
        "eos_token_id": 1
    });
    std::fs::write(dir.join("config.json"), config.to_string())?;

    let cfg: CausalLmConfig = serde_json::from_value(config)?;
    let varmap = VarMap::new();
    let _model = CausalLm::new(&cfg, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu))?;
    varmap.save(dir.join("model.safetensors"))?;

    write_tokenizer(&dir.join("tokenizer.json"))
}

fn write_pairs(path: &Path, repeat: usize) -> Result<()> {
    let mut lines = String::new();
    for i in 0..repeat {
        let (en, fi) = PAIRS[i % PAIRS.len()];
        let record = serde_json::json!({ "translation": { "en": en, "fi": fi } });
        lines.push_str(&record.to_string());
        lines.push('\n');
    }
    std::fs::write(path, lines)?;
    Ok(())
}

fn config(root: &Path, training: TrainingArguments) -> FinetuneConfig {
    FinetuneConfig {
        model: root.join("model").to_string_lossy().into_owned(),
        revision: "main".to_string(),
        max_length: 32,
        prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        mask_prompt: false,
        force_cpu: true,
        data: DataConfig {
            train_data: Some(root.join("train.jsonl")),
            cache_dir: root.join("cache"),
            ..DataConfig::default()
        },
        training,
    }
}

fn setup() -> Result<tempfile::TempDir> {
    let root = tempfile::tempdir()?;
    std::fs::create_dir_all(root.path().join("model"))?;
    write_model(&root.path().join("model"))?;
    write_pairs(&root.path().join("train.jsonl"), 20)?;
    Ok(root)
}

#[test]
fn local_data_split_and_train() -> Result<()> {
    let root = setup()?;
    let training = TrainingArguments {
        output_dir: root.path().join("out"),
        num_train_epochs: 2,
        per_device_train_batch_size: 4,
        per_device_eval_batch_size: 4,
        learning_rate: 5e-3,
        logging_steps: 1,
        ..TrainingArguments::default()
    };
    let report = pipeline::run(&config(root.path(), training))?;

    // 20 pairs -> 16 train / 4 test; 4 steps per epoch
    assert_eq!(report.train.global_step, 8);
    assert!(report.loss_before.is_finite() && report.loss_before > 0.0);
    assert!(report.loss_after.is_finite());
    assert!(report.loss_after < report.loss_before);
    assert!(root.path().join("out").join(pipeline::TRAINING_ARGS_NAME).exists());
    assert!(!root.path().join("out").join("checkpoint-8").exists());
    Ok(())
}

#[test]
fn separate_eval_file_with_checkpoints() -> Result<()> {
    let root = setup()?;
    write_pairs(&root.path().join("eval.jsonl"), 3)?;

    let training = TrainingArguments {
        output_dir: root.path().join("out"),
        num_train_epochs: 1,
        per_device_train_batch_size: 5,
        evaluation_strategy: IntervalStrategy::No,
        save_strategy: IntervalStrategy::Epoch,
        ..TrainingArguments::default()
    };
    let mut cfg = config(root.path(), training);
    cfg.mask_prompt = true;
    cfg.data.eval_data = Some(root.path().join("eval.jsonl"));

    let report = pipeline::run(&cfg)?;
    assert_eq!(report.train.global_step, 4);
    assert!(report.loss_before.is_finite() && report.loss_after.is_finite());

    let checkpoint = root.path().join("out").join("checkpoint-4");
    for name in ["model.safetensors", "trainer_state.json", "config.json", "tokenizer.json"] {
        assert!(checkpoint.join(name).exists(), "missing {name}");
    }
    Ok(())
}

#[test]
fn max_length_is_clamped_to_the_model_context() -> Result<()> {
    let root = setup()?;
    // ~90 tokens per example, beyond the 64 positions of the tiny model
    let long_source = vec!["good morning"; 40].join(" ");
    let mut lines = String::new();
    for _ in 0..10 {
        let record = serde_json::json!({ "translation": { "en": long_source, "fi": "Hyvää huomenta" } });
        lines.push_str(&record.to_string());
        lines.push('\n');
    }
    std::fs::write(root.path().join("train.jsonl"), lines)?;

    let training = TrainingArguments {
        output_dir: root.path().join("out"),
        num_train_epochs: 1,
        per_device_train_batch_size: 4,
        ..TrainingArguments::default()
    };
    let mut cfg = config(root.path(), training);
    cfg.max_length = 128;

    let report = pipeline::run(&cfg)?;
    assert_eq!(report.train.global_step, 2);
    assert!(report.loss_before.is_finite() && report.loss_after.is_finite());
    Ok(())
}

#[test]
fn incomplete_model_directory_fails() -> Result<()> {
    let root = setup()?;
    std::fs::remove_file(root.path().join("model").join("tokenizer.json"))?;
    let training = TrainingArguments {
        output_dir: root.path().join("out"),
        ..TrainingArguments::default()
    };
    assert!(pipeline::run(&config(root.path(), training)).is_err());
    Ok(())
}
