//! Per-epoch checkpoints and best-model selection.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::Serialize;

use crate::error::{CoTeachError, CoTeachResult};

/// File layout of a run's checkpoints.
///
/// Every file name carries its epoch and model number, so within a run no
/// write replaces a file that was already complete.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dirpath: PathBuf,
    prefix: String,
}

impl CheckpointStore {
    pub fn new(dirpath: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dirpath: dirpath.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    /// `model_no` is 1 or 2.
    pub fn epoch_path(&self, model_no: usize, epoch: usize) -> PathBuf {
        self.dirpath
            .join(format!("{}_model{}_{:04}.safetensors", self.prefix, model_no, epoch))
    }

    pub fn best_path(&self, model_no: usize, epoch: usize) -> PathBuf {
        self.dirpath
            .join(format!("{}_best_model{}_{:04}.safetensors", self.prefix, model_no, epoch))
    }

    fn save(&self, varmap: &VarMap, path: &Path) -> CoTeachResult<()> {
        std::fs::create_dir_all(&self.dirpath)?;
        varmap.save(path).map_err(|e| {
            CoTeachError::checkpoint(format!("failed to write {}: {e}", path.display()))
        })
    }

    /// Unconditional per-epoch snapshot of one peer.
    pub fn save_epoch(&self, varmap: &VarMap, model_no: usize, epoch: usize) -> CoTeachResult<PathBuf> {
        let path = self.epoch_path(model_no, epoch);
        self.save(varmap, &path)?;
        Ok(path)
    }

    pub fn save_best(&self, varmap: &VarMap, model_no: usize, epoch: usize) -> CoTeachResult<PathBuf> {
        let path = self.best_path(model_no, epoch);
        self.save(varmap, &path)?;
        Ok(path)
    }

    /// Most recent best checkpoint on disk, if any.
    pub fn latest_best(&self) -> CoTeachResult<Option<PathBuf>> {
        if !self.dirpath.is_dir() {
            return Ok(None);
        }
        let marker = format!("{}_best_model", self.prefix);
        let mut found: Vec<PathBuf> = std::fs::read_dir(&self.dirpath)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&marker) && n.ends_with(".safetensors"))
            })
            .collect();
        let epoch_of = |p: &PathBuf| {
            p.file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.rsplit('_').next())
                .and_then(|e| e.parse::<usize>().ok())
        };
        found.sort_by_key(|p| (epoch_of(p), p.clone()));
        Ok(found.pop())
    }
}

/// Load a checkpoint into `varmap`.
///
/// Every variable must be present in the file with the same shape and dtype.
/// The file is checked in full before any variable is written, so a failed
/// load leaves `varmap` untouched.
pub fn load_checkpoint(varmap: &mut VarMap, path: impl AsRef<Path>) -> CoTeachResult<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(CoTeachError::checkpoint(format!(
            "checkpoint not found: {}",
            path.display()
        )));
    }
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| CoTeachError::checkpoint("variable map lock poisoned"))?;
    let Some(device) = vars.values().next().map(|v| v.device().clone()) else {
        return Ok(());
    };
    let tensors = candle::safetensors::load(path, &device)
        .map_err(|e| CoTeachError::checkpoint(format!("failed to load {}: {e}", path.display())))?;

    let mut staged = Vec::with_capacity(vars.len());
    for (name, var) in vars.iter() {
        let tensor = tensors.get(name).ok_or_else(|| {
            CoTeachError::checkpoint(format!("{}: missing tensor {name}", path.display()))
        })?;
        if tensor.shape() != var.shape() || tensor.dtype() != var.dtype() {
            return Err(CoTeachError::checkpoint(format!(
                "{}: tensor {name} is {:?} {:?}, expected {:?} {:?}",
                path.display(),
                tensor.dtype(),
                tensor.shape(),
                var.dtype(),
                var.shape()
            )));
        }
        staged.push((var, tensor));
    }
    for (var, tensor) in staged {
        var.set(tensor)?;
    }
    Ok(())
}

/// Best validation score seen so far in the run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BestScore {
    pub epoch: Option<usize>,
    /// Model number (1 or 2) that set the score.
    pub model: Option<usize>,
    pub loss: Option<f64>,
    pub f1: f64,
}

/// Tracks the best F1 across both peers and persists the model that beats it.
///
/// This is the only writer of the run's best score. `best.f1` never decreases.
pub struct CheckpointSelector {
    store: Option<CheckpointStore>,
    best: BestScore,
}

impl CheckpointSelector {
    pub fn new(initial_f1: f64) -> Self {
        Self {
            store: None,
            best: BestScore {
                epoch: None,
                model: None,
                loss: None,
                f1: initial_f1,
            },
        }
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn best(&self) -> BestScore {
        self.best
    }

    /// Offer model `model_no`'s score. Only a strictly higher F1 replaces the
    /// best score and writes a "best" checkpoint; returns whether it did.
    pub fn update(
        &mut self,
        epoch: usize,
        model_no: usize,
        candidate_f1: f64,
        candidate_loss: Option<f64>,
        varmap: &VarMap,
    ) -> CoTeachResult<bool> {
        if !(candidate_f1 > self.best.f1) {
            return Ok(false);
        }
        if let Some(store) = &self.store {
            store.save_best(varmap, model_no, epoch)?;
        }
        self.best = BestScore {
            epoch: Some(epoch),
            model: Some(model_no),
            loss: candidate_loss,
            f1: candidate_f1,
        };
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::{DType, Device};
    use candle_nn::VarBuilder;

    fn varmap() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        candle_nn::linear(3, 1, vb.pp("head")).unwrap();
        varmap
    }

    /// Every variable's values, by name.
    fn snapshot(varmap: &VarMap) -> Vec<(String, Vec<f32>)> {
        let data = varmap.data().lock().unwrap();
        let mut out: Vec<(String, Vec<f32>)> = data
            .iter()
            .map(|(name, v)| (name.clone(), v.flatten_all().unwrap().to_vec1().unwrap()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn test_paths_do_not_collide() {
        let store = CheckpointStore::new("ckpt", "run");
        assert_ne!(store.epoch_path(1, 3), store.epoch_path(2, 3));
        assert_ne!(store.epoch_path(1, 3), store.epoch_path(1, 4));
        assert_ne!(store.best_path(1, 3), store.best_path(2, 3));
        assert_ne!(store.best_path(1, 3), store.epoch_path(1, 3));
        assert_eq!(
            store.best_path(2, 7),
            PathBuf::from("ckpt").join("run_best_model2_0007.safetensors")
        );
    }

    #[test]
    fn test_best_f1_never_decreases() {
        let vm = varmap();
        let mut sel = CheckpointSelector::new(0.001);
        let candidates = [0.2, 0.1, 0.5, 0.5, 0.3, f64::NAN, 0.9, 0.0];
        let mut prev = sel.best().f1;
        for (epoch, f1) in candidates.into_iter().enumerate() {
            sel.update(epoch, 1 + epoch % 2, f1, Some(1.0), &vm).unwrap();
            assert!(sel.best().f1 >= prev);
            prev = sel.best().f1;
        }
        assert_eq!(sel.best().f1, 0.9);
        assert_eq!(sel.best().epoch, Some(6));
        assert_eq!(sel.best().model, Some(1));
    }

    #[test]
    fn test_equal_f1_is_not_an_improvement() {
        let vm = varmap();
        let mut sel = CheckpointSelector::new(0.5);
        assert!(!sel.update(0, 1, 0.5, Some(0.2), &vm).unwrap());
        assert_eq!(sel.best().loss, None);
        assert!(sel.update(1, 2, 0.6, Some(0.2), &vm).unwrap());
        assert_eq!(sel.best().loss, Some(0.2));
    }

    #[test]
    fn test_best_checkpoint_written_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let vm = varmap();
        let mut sel = CheckpointSelector::new(0.001).with_store(store.clone());

        sel.update(0, 1, 0.4, None, &vm).unwrap();
        sel.update(1, 1, 0.3, None, &vm).unwrap();

        assert!(store.best_path(1, 0).is_file());
        assert!(!store.best_path(1, 1).exists());
        assert_eq!(store.latest_best().unwrap(), Some(store.best_path(1, 0)));
    }

    #[test]
    fn test_both_peers_improving_in_one_epoch_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let (vm1, vm2) = (varmap(), varmap());
        let mut sel = CheckpointSelector::new(0.001).with_store(store.clone());

        assert!(sel.update(3, 1, 0.4, None, &vm1).unwrap());
        assert!(sel.update(3, 2, 0.6, None, &vm2).unwrap());

        let mut first = varmap();
        load_checkpoint(&mut first, store.best_path(1, 3)).unwrap();
        assert_eq!(snapshot(&first), snapshot(&vm1));
        let mut second = varmap();
        load_checkpoint(&mut second, store.best_path(2, 3)).unwrap();
        assert_eq!(snapshot(&second), snapshot(&vm2));
    }

    #[test]
    fn test_latest_best_orders_by_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let vm = varmap();
        store.save_best(&vm, 2, 9).unwrap();
        store.save_best(&vm, 1, 10).unwrap();
        assert_eq!(store.latest_best().unwrap(), Some(store.best_path(1, 10)));
    }

    #[test]
    fn test_load_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let vm = varmap();
        let path = store.save_epoch(&vm, 1, 0).unwrap();

        let mut other = varmap();
        load_checkpoint(&mut other, &path).unwrap();
        assert_eq!(snapshot(&other), snapshot(&vm));

        let missing = load_checkpoint(&mut other, dir.path().join("nope.safetensors"));
        assert!(matches!(missing, Err(CoTeachError::Checkpoint(_))));
    }

    #[test]
    fn test_incompatible_checkpoint_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let path = store.save_epoch(&varmap(), 1, 0).unwrap();

        // Loading visits variables in map order, so repeat to cover orders in
        // which the present tensor comes before the missing ones.
        for _ in 0..50 {
            let mut wider = VarMap::new();
            let vb = VarBuilder::from_varmap(&wider, DType::F32, &Device::Cpu);
            candle_nn::linear(3, 1, vb.pp("head")).unwrap();
            for i in 0..4 {
                candle_nn::linear(3, 1, vb.pp(format!("extra{i}"))).unwrap();
            }
            let before = snapshot(&wider);

            let err = load_checkpoint(&mut wider, &path).unwrap_err();
            assert!(matches!(err, CoTeachError::Checkpoint(_)));
            assert_eq!(snapshot(&wider), before);
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "t");
        let path = store.save_epoch(&varmap(), 1, 0).unwrap();

        let mut other = VarMap::new();
        let vb = VarBuilder::from_varmap(&other, DType::F32, &Device::Cpu);
        candle_nn::linear(4, 1, vb.pp("head")).unwrap();
        let before = snapshot(&other);
        assert!(load_checkpoint(&mut other, &path).is_err());
        assert_eq!(snapshot(&other), before);
    }
}
