//! Trainer: evaluation and the supervised fine-tuning loop.

use anyhow::Result;
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use llm_core::{causal_lm_loss, CausalLm};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::checkpoint::{CheckpointManager, LogEntry};
use super::collator::{Batch, CausalLmCollator};
use super::schedule::LrScheduler;
use crate::config::{IntervalStrategy, TrainingArguments};
use crate::tokenize::TokenizedExample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    pub eval_loss: f64,
    pub eval_tokens: usize,
    pub eval_runtime_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutput {
    pub global_step: usize,
    /// Mean loss over all optimizer steps
    pub training_loss: f64,
    pub train_runtime_secs: f64,
    pub interrupted: bool,
}

static STOP_REQUESTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Process-wide stop flag, wired to Ctrl+C on first use.
///
/// First press asks the loop to finish its current step; a second press exits.
pub fn stop_flag() -> Arc<AtomicBool> {
    STOP_REQUESTED
        .get_or_init(|| {
            let stop = Arc::new(AtomicBool::new(false));
            let s = stop.clone();
            let presses = AtomicUsize::new(0);
            let installed = ctrlc::set_handler(move || {
                let count = presses.fetch_add(1, Ordering::SeqCst) + 1;
                if count == 1 {
                    info!("\n\n🛑 Ctrl+C detected! Finishing current step...");
                    info!("   (Press Ctrl+C again to force quit)");
                    s.store(true, Ordering::SeqCst);
                } else {
                    error!("\n⚠️  Force quit! Exiting immediately.");
                    std::process::exit(1);
                }
            });
            if let Err(e) = installed {
                warn!("⚠️ Ctrl+C handler not installed: {}", e);
            }
            stop
        })
        .clone()
}

pub struct Trainer {
    pub model: CausalLm,
    pub varmap: VarMap,
    pub args: TrainingArguments,
    collator: CausalLmCollator,
    train_set: Vec<TokenizedExample>,
    eval_set: Vec<TokenizedExample>,
    device: Device,
    checkpoints: Option<CheckpointManager>,
    pub log_history: Vec<LogEntry>,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(
        model: CausalLm,
        varmap: VarMap,
        args: TrainingArguments,
        collator: CausalLmCollator,
        train_set: Vec<TokenizedExample>,
        eval_set: Vec<TokenizedExample>,
        device: Device,
    ) -> Result<Self> {
        args.validate()?;
        let checkpoints = if args.save_strategy == IntervalStrategy::No {
            None
        } else {
            Some(CheckpointManager::new(&args.output_dir, args.save_total_limit))
        };
        Ok(Self {
            model,
            varmap,
            args,
            collator,
            train_set,
            eval_set,
            device,
            checkpoints,
            log_history: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Copies these files (model config, tokenizer) into every checkpoint.
    pub fn with_checkpoint_companions(mut self, files: Vec<PathBuf>) -> Self {
        self.checkpoints = self.checkpoints.map(|c| c.with_companions(files));
        self
    }

    /// Replaces the private stop flag, e.g. with [`stop_flag`].
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn micro_steps_per_epoch(&self) -> usize {
        self.train_set
            .len()
            .div_ceil(self.args.per_device_train_batch_size)
    }

    /// Optimizer steps in one pass over the training set.
    pub fn steps_per_epoch(&self) -> usize {
        self.micro_steps_per_epoch()
            .div_ceil(self.args.gradient_accumulation_steps)
            .max(1)
    }

    pub fn total_steps(&self) -> usize {
        self.args
            .max_steps
            .unwrap_or(self.args.num_train_epochs * self.steps_per_epoch())
    }

    fn forward_loss(&self, batch: &Batch) -> Result<(Tensor, usize)> {
        let logits = self.model.forward(&batch.input_ids)?;
        Ok(causal_lm_loss(&logits, &batch.input_ids, &batch.loss_mask)?)
    }

    /// Mean eval loss, each batch weighted by its number of examples.
    pub fn evaluate(&self) -> Result<EvalMetrics> {
        if self.eval_set.is_empty() {
            anyhow::bail!("evaluation set is empty");
        }
        let start = Instant::now();
        let mut weighted = 0.0f64;
        let mut examples = 0usize;
        let mut tokens = 0usize;

        for chunk in self.eval_set.chunks(self.args.per_device_eval_batch_size) {
            let refs: Vec<&TokenizedExample> = chunk.iter().collect();
            let batch = self.collator.collate(&refs, &self.device)?;
            let (loss, n) = self.forward_loss(&batch)?;
            let loss = loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
            weighted += loss * batch.examples as f64;
            examples += batch.examples;
            tokens += n;
        }

        let metrics = EvalMetrics {
            eval_loss: weighted / examples as f64,
            eval_tokens: tokens,
            eval_runtime_secs: start.elapsed().as_secs_f64(),
        };
        debug!(
            "eval: loss {:.4} over {} target tokens in {:.1}s",
            metrics.eval_loss, metrics.eval_tokens, metrics.eval_runtime_secs
        );
        Ok(metrics)
    }

    pub fn train(&mut self) -> Result<TrainOutput> {
        if self.train_set.is_empty() {
            anyhow::bail!("training set is empty");
        }
        let args = self.args.clone();
        let vars = self.varmap.all_vars();
        let mut optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: args.learning_rate,
                beta1: args.adam_beta1,
                beta2: args.adam_beta2,
                eps: args.adam_epsilon,
                weight_decay: args.weight_decay,
            },
        )?;

        let steps_per_epoch = self.steps_per_epoch();
        let total_steps = self.total_steps();
        let num_epochs = total_steps.div_ceil(steps_per_epoch);
        let scheduler = LrScheduler::new(
            args.learning_rate,
            args.warmup_steps,
            total_steps,
            args.lr_scheduler_type,
        );

        info!("--- Fine-tuning ---");
        info!(
            "  Examples: {} | Epochs: {} | Batch: {} x {} accumulation",
            self.train_set.len(),
            num_epochs,
            args.per_device_train_batch_size,
            args.gradient_accumulation_steps
        );
        info!(
            "  Optimizer steps: {} ({} per epoch) | LR: {:e} ({:?}, warmup {})",
            total_steps, steps_per_epoch, args.learning_rate, args.lr_scheduler_type, args.warmup_steps
        );

        let start = Instant::now();
        let mut global_step = 0usize;
        let mut loss_total = 0.0f64;
        let mut loss_since_log = 0.0f64;
        let mut steps_since_log = 0usize;
        let mut interrupted = false;

        'epochs: for epoch in 0..num_epochs {
            let mut order: Vec<usize> = (0..self.train_set.len()).collect();
            let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);

            let micro_batches: Vec<&[usize]> = order.chunks(args.per_device_train_batch_size).collect();
            for group in micro_batches.chunks(args.gradient_accumulation_steps) {
                if global_step >= total_steps {
                    break 'epochs;
                }
                if self.stop.load(Ordering::SeqCst) {
                    info!("🛑 Stop requested, leaving the training loop at step {}", global_step);
                    interrupted = true;
                    break 'epochs;
                }

                let lr = scheduler.lr_at(global_step);
                optimizer.set_learning_rate(lr);
                let loss = self.optimizer_step(&mut optimizer, &vars, group)?;
                global_step += 1;
                loss_total += loss;
                loss_since_log += loss;
                steps_since_log += 1;

                let epoch_progress = global_step as f64 / steps_per_epoch as f64;
                if !loss.is_finite() {
                    warn!("⚠️ Non-finite loss {} at step {}", loss, global_step);
                }

                if args.logging_steps > 0 && global_step % args.logging_steps == 0 {
                    let avg = loss_since_log / steps_since_log as f64;
                    info!(
                        "Step {:>6}/{} | Epoch {:.2} | Loss {:.4} | LR {:.3e}",
                        global_step, total_steps, epoch_progress, avg, lr
                    );
                    self.log_history.push(LogEntry {
                        step: global_step,
                        epoch: epoch_progress,
                        loss: Some(avg),
                        learning_rate: Some(lr),
                        eval_loss: None,
                    });
                    loss_since_log = 0.0;
                    steps_since_log = 0;
                }

                if args.evaluation_strategy == IntervalStrategy::Steps
                    && global_step % args.eval_steps == 0
                {
                    self.log_eval(global_step, epoch_progress)?;
                }

                if args.save_strategy == IntervalStrategy::Steps && global_step % args.save_steps == 0 {
                    self.save_checkpoint(global_step, epoch_progress, Some(loss))?;
                }
            }

            let epoch_progress = (epoch + 1) as f64;
            info!("✅ Epoch {} done (step {})", epoch + 1, global_step);
            if args.evaluation_strategy == IntervalStrategy::Epoch {
                self.log_eval(global_step, epoch_progress)?;
            }
            if args.save_strategy == IntervalStrategy::Epoch {
                self.save_checkpoint(global_step, epoch_progress, None)?;
            }
        }

        let output = TrainOutput {
            global_step,
            training_loss: if global_step > 0 {
                loss_total / global_step as f64
            } else {
                0.0
            },
            train_runtime_secs: start.elapsed().as_secs_f64(),
            interrupted,
        };
        info!(
            "🏁 Training finished: {} steps, mean loss {:.4}, {:.1}s",
            output.global_step, output.training_loss, output.train_runtime_secs
        );
        Ok(output)
    }

    /// Forward + backward over the accumulated micro-batches, then one AdamW update.
    fn optimizer_step(&self, optimizer: &mut AdamW, vars: &[Var], group: &[&[usize]]) -> Result<f64> {
        let scale = 1.0 / group.len() as f64;
        let mut total: Option<Tensor> = None;
        let mut loss_sum = 0.0f64;

        for indices in group {
            let refs: Vec<&TokenizedExample> = indices.iter().map(|&i| &self.train_set[i]).collect();
            let batch = self.collator.collate(&refs, &self.device)?;
            let (loss, _) = self.forward_loss(&batch)?;
            loss_sum += loss.to_scalar::<f32>()? as f64;
            let scaled = loss.affine(scale, 0.0)?;
            total = Some(match total {
                None => scaled,
                Some(prev) => (prev + scaled)?,
            });
        }
        let Some(total) = total else {
            anyhow::bail!("empty accumulation group");
        };

        let mut grads = total.backward()?;
        if self.args.max_grad_norm > 0.0 {
            let norm = clip_grad_norm(&mut grads, vars, self.args.max_grad_norm)?;
            debug!("grad norm {:.4}", norm);
        }
        optimizer.step(&grads)?;

        Ok(loss_sum * scale)
    }

    fn log_eval(&mut self, global_step: usize, epoch: f64) -> Result<()> {
        let metrics = self.evaluate()?;
        info!(
            "📊 Eval @ step {} | eval_loss {:.4} ({:.1}s)",
            global_step, metrics.eval_loss, metrics.eval_runtime_secs
        );
        self.log_history.push(LogEntry {
            step: global_step,
            epoch,
            eval_loss: Some(metrics.eval_loss),
            ..Default::default()
        });
        Ok(())
    }

    fn save_checkpoint(&mut self, global_step: usize, epoch: f64, loss: Option<f64>) -> Result<()> {
        if let Some(manager) = self.checkpoints.as_mut() {
            manager.save(&self.varmap, global_step, epoch, loss, &self.log_history)?;
        }
        Ok(())
    }
}

/// Rescales gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.to_dtype(DType::F32)?.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total.sqrt().max(1e-12);
    if norm <= max_norm {
        return Ok(norm);
    }
    let scale = max_norm / norm;
    for var in vars {
        if let Some(g) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), g.affine(scale, 0.0)?);
        }
    }
    Ok(norm)
}
