mod common;

use candle_core::{DType, Device, IndexOp, Module, Tensor, Var, D};
use candle_nn::{linear, Linear, VarBuilder, VarMap};
use tempfile::tempdir;
use tryon_training::{
    BaseModel, DataBatch, ExperimentLogger, LoggingSettings, Result, Trainer, TryonModel,
};

use common::{load_video_config, write_video_dataset};

/// Predicts the mean cloth colour of the last frame from pooled person inputs.
struct PooledColour {
    varmap: VarMap,
    head: Linear,
    training_flags: Vec<bool>,
}

impl PooledColour {
    fn new(base: &BaseModel) -> anyhow::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, base.device());
        let in_features = base.person_channels() * base.n_frames_total();
        let head = linear(in_features, base.cloth_channels(), vb.pp("head"))?;
        Ok(Self {
            varmap,
            head,
            training_flags: Vec::new(),
        })
    }

    fn loss(&self, base: &BaseModel, batch: &DataBatch) -> Result<Tensor> {
        let person = batch.cat_inputs(&base.config().network.person_inputs)?;
        let pooled = person.mean(D::Minus1)?.mean(D::Minus1)?.flatten_from(1)?;
        let prediction = self.head.forward(&pooled)?;

        let cloth = &batch.inputs["cloth"];
        let last = base.n_frames_total() - 1;
        let target = cloth.i((.., last))?.mean(D::Minus1)?.mean(D::Minus1)?;
        Ok(prediction.sub(&target)?.sqr()?.mean_all()?)
    }
}

impl TryonModel for PooledColour {
    fn parameters(&self) -> Vec<(String, Var)> {
        let data = self.varmap.data().lock().unwrap();
        let mut named: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }

    fn training_step(&mut self, base: &BaseModel, batch: &DataBatch) -> Result<Tensor> {
        self.loss(base, batch)
    }

    fn validation_step(&mut self, base: &BaseModel, batch: &DataBatch) -> Result<Tensor> {
        self.loss(base, batch)
    }

    fn set_training(&mut self, training: bool) {
        self.training_flags.push(training);
    }
}

#[test]
fn smoke_training_reduces_loss_and_decays_lr() {
    let tmp = tempdir().expect("tempdir");
    let dataroot = tmp.path().join("data");
    write_video_dataset(&dataroot, "train", 2, 5);

    let config = load_video_config(tmp.path(), &dataroot);
    let base = BaseModel::new(config, Device::Cpu).unwrap();
    let model = PooledColour::new(&base).unwrap();
    let logger = ExperimentLogger::new(LoggingSettings::new(Some(tmp.path().join("tb")), 1))
        .unwrap();

    let mut trainer = Trainer::new(base, model, logger).unwrap();
    let initial = trainer.validate().unwrap().expect("validation split");
    let summaries = trainer.fit().unwrap();

    // keep_epochs + decay_epochs
    assert_eq!(summaries.len(), 5);
    assert_eq!(trainer.global_step(), 10);

    let first = summaries.first().unwrap().train_loss.unwrap();
    let last = summaries.last().unwrap().train_loss.unwrap();
    assert!(last < first, "train loss did not improve: {first} -> {last}");

    let final_val = summaries.last().unwrap().validation.clone().unwrap();
    assert!(final_val.average_loss < initial.average_loss);
    assert_eq!(final_val.samples, 2);

    let lrs: Vec<f64> = summaries.iter().map(|s| s.learning_rate).collect();
    assert!((lrs[0] - 0.01).abs() < 1e-12);
    assert!((lrs[3] - 0.01).abs() < 1e-12);
    assert!((lrs[4] - 0.01 * 2.0 / 3.0).abs() < 1e-12);
    assert!((trainer.learning_rate() - 0.01 / 3.0).abs() < 1e-12);

    assert!(trainer.model().training_flags.contains(&false));
    assert_eq!(
        std::fs::read_dir(tmp.path().join("tb")).unwrap().count(),
        1
    );
}

#[test]
fn shutdown_callback_stops_early() {
    let tmp = tempdir().expect("tempdir");
    let dataroot = tmp.path().join("data");
    write_video_dataset(&dataroot, "train", 2, 5);

    let config = load_video_config(tmp.path(), &dataroot);
    let base = BaseModel::new(config, Device::Cpu).unwrap();
    let model = PooledColour::new(&base).unwrap();
    let logger = ExperimentLogger::new(LoggingSettings::disabled()).unwrap();

    let mut trainer = Trainer::new(base, model, logger).unwrap().with_max_epochs(10);
    let mut calls = 0;
    let summaries = trainer
        .fit_with_shutdown(|| {
            calls += 1;
            calls > 3
        })
        .unwrap();

    assert_eq!(trainer.global_step(), 3);
    assert_eq!(summaries.len(), 1);
}
