//! Epoch-end controls driven by validation loss.
//!
//! Both follow the Keras counting rules: an epoch improves on the best loss only when it
//! beats it by more than `min_delta`, and `patience` counts consecutive epochs without
//! improvement.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 3,
            min_lr: 1e-5,
            min_delta: 1e-4,
        }
    }
}

/// Halves (by `factor`) the learning rate after `patience` flat epochs, never below `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    cfg: PlateauConfig,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(cfg: PlateauConfig) -> Self {
        Self {
            cfg,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    pub fn wait(&self) -> usize {
        self.wait
    }

    /// Returns the new learning rate when it was reduced this epoch.
    pub fn on_epoch_end(&mut self, val_loss: f64, lr: f64) -> Option<f64> {
        if val_loss < self.best - self.cfg.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.cfg.patience || lr <= self.cfg.min_lr {
            return None;
        }
        self.wait = 0;
        Some((lr * self.cfg.factor).max(self.cfg.min_lr))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 5,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

#[derive(Debug)]
pub enum StopDecision<M> {
    Continue,
    /// Training should end; `restore` carries the best snapshot when one is kept.
    Stop { best_epoch: usize, restore: Option<M> },
}

/// Stops after `patience` epochs without improvement, optionally handing back the
/// weights of the best epoch.
///
/// `M` is whatever snapshot of the model is cheap to clone (a burn module is).
#[derive(Debug)]
pub struct EarlyStopping<M> {
    cfg: EarlyStoppingConfig,
    best: f64,
    best_epoch: usize,
    best_weights: Option<M>,
    wait: usize,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(cfg: EarlyStoppingConfig) -> Self {
        Self {
            cfg,
            best: f64::INFINITY,
            best_epoch: 0,
            best_weights: None,
            wait: 0,
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// `epoch` is zero-based.
    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: f64, model: &M) -> StopDecision<M> {
        if self.cfg.restore_best_weights && self.best_weights.is_none() {
            self.best_weights = Some(model.clone());
        }
        self.wait += 1;
        if val_loss < self.best - self.cfg.min_delta {
            self.best = val_loss;
            self.best_epoch = epoch;
            if self.cfg.restore_best_weights {
                self.best_weights = Some(model.clone());
            }
            self.wait = 0;
            return StopDecision::Continue;
        }
        if self.wait >= self.cfg.patience && epoch > 0 {
            let restore = if self.cfg.restore_best_weights {
                self.best_weights.take()
            } else {
                None
            };
            return StopDecision::Stop {
                best_epoch: self.best_epoch,
                restore,
            };
        }
        StopDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plateau_reduces_after_patience_and_resets() {
        let mut cb = ReduceLrOnPlateau::new(PlateauConfig::default());
        let mut lr = 1e-3;
        assert_eq!(cb.on_epoch_end(1.0, lr), None);
        assert_eq!(cb.on_epoch_end(1.0, lr), None);
        assert_eq!(cb.on_epoch_end(0.99995, lr), None); // inside min_delta
        let reduced = cb.on_epoch_end(1.2, lr);
        assert_eq!(reduced, Some(5e-4));
        lr = reduced.unwrap();
        assert_eq!(cb.wait(), 0);
        // improvement resets the counter
        assert_eq!(cb.on_epoch_end(0.5, lr), None);
        assert_eq!(cb.on_epoch_end(0.6, lr), None);
        assert_eq!(cb.wait(), 1);
    }

    #[test]
    fn plateau_floors_at_min_lr() {
        let mut cb = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 1,
            ..PlateauConfig::default()
        });
        cb.on_epoch_end(1.0, 1.5e-5);
        assert_eq!(cb.on_epoch_end(1.0, 1.5e-5), Some(1e-5));
        // already at the floor: nothing more to do
        assert_eq!(cb.on_epoch_end(1.0, 1e-5), None);
        assert_eq!(cb.on_epoch_end(1.0, 1e-5), None);
    }

    #[test]
    fn early_stopping_restores_best_snapshot() {
        let mut es = EarlyStopping::<&str>::new(EarlyStoppingConfig::default());
        let losses = [1.0, 0.8, 0.9, 0.9, 0.85, 0.81, 0.95];
        let snaps = ["e0", "e1", "e2", "e3", "e4", "e5", "e6"];
        let mut stopped = None;
        for (epoch, (&loss, snap)) in losses.iter().zip(snaps).enumerate() {
            if let StopDecision::Stop { best_epoch, restore } = es.on_epoch_end(epoch, loss, &snap) {
                stopped = Some((epoch, best_epoch, restore));
                break;
            }
        }
        assert_eq!(stopped, Some((6, 1, Some("e1"))));
    }

    #[test]
    fn early_stopping_without_improvement_keeps_first_epoch() {
        let mut es = EarlyStopping::<u32>::new(EarlyStoppingConfig {
            patience: 2,
            ..EarlyStoppingConfig::default()
        });
        // NaN never improves; epoch 0 is still snapshotted
        assert!(matches!(es.on_epoch_end(0, f64::NAN, &0), StopDecision::Continue));
        match es.on_epoch_end(1, f64::NAN, &1) {
            StopDecision::Stop { best_epoch, restore } => {
                assert_eq!(best_epoch, 0);
                assert_eq!(restore, Some(0));
            }
            StopDecision::Continue => panic!("expected a stop"),
        }
    }

    #[test]
    fn no_restore_when_disabled() {
        let mut es = EarlyStopping::<u32>::new(EarlyStoppingConfig {
            patience: 1,
            restore_best_weights: false,
            ..EarlyStoppingConfig::default()
        });
        es.on_epoch_end(0, 1.0, &0);
        assert!(matches!(
            es.on_epoch_end(1, 1.0, &1),
            StopDecision::Stop { restore: None, .. }
        ));
    }
}
