//! Network-in-Network backbone with an auxiliary natural/adversarial batch norm.
//!
//! The first two feature blocks encode the (batch-normalized) input into a
//! latent mean and log-variance; a sample from that latent is decoded by the
//! remaining blocks, ending with global average pooling.

mod blocks;
mod features;
pub mod regressor;

use candle_core::{ModuleT, Tensor};
use candle_nn::{BatchNorm, VarBuilder};
use tracing::debug;

use crate::config::{NinConfig, NIN_CHANNELS, NIN_CHANNELS_2, NIN_CHANNELS_3};
use crate::error::{Error, Result};
use crate::models::shared::image_type::ImageType;
use crate::models::shared::layers::batch_norm2d;
use crate::models::shared::pooling::Pool2dConfig;

pub use blocks::{BasicBlock, EncBlock, FeatureBlock, StageLayer};
pub use features::FeatureRequest;

/// Blocks run before the latent is sampled.
const ENCODER_BLOCKS: usize = 2;

pub struct NetworkInNetwork {
    cfg: NinConfig,
    bn_nat: BatchNorm,
    bn_adv: BatchNorm,
    blocks: Vec<FeatureBlock>,
    feature_names: Vec<String>,
}

impl NetworkInNetwork {
    pub fn load(cfg: NinConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let bn_nat = batch_norm2d(cfg.in_channels, cfg.bn_eps, cfg.bn_momentum, vb.pp("bn_nat"))?;
        let bn_adv = batch_norm2d(cfg.in_channels, cfg.bn_eps, cfg.bn_momentum, vb.pp("bn_adv"))?;

        let vb_blocks = vb.pp("_feature_blocks");
        let mut blocks = Vec::with_capacity(cfg.num_stages + 1);

        let vb0 = vb_blocks.pp("0");
        let mut block = FeatureBlock::new();
        block.push(
            "Block1_ConvB1",
            basic(cfg.in_channels, NIN_CHANNELS, 5, &cfg, &vb0, "Block1_ConvB1")?,
        );
        block.push(
            "Block1_ConvB2",
            basic(NIN_CHANNELS, NIN_CHANNELS_2, 1, &cfg, &vb0, "Block1_ConvB2")?,
        );
        block.push(
            "Block1_ConvB3",
            basic(NIN_CHANNELS_2, NIN_CHANNELS_3, 1, &cfg, &vb0, "Block1_ConvB3")?,
        );
        block.push("Block1_MaxPool", StageLayer::MaxPool(downsample()));
        blocks.push(block);

        let vb1 = vb_blocks.pp("1");
        let mut block = FeatureBlock::new();
        block.push(
            "Block2_ConvB1",
            basic(NIN_CHANNELS_3, NIN_CHANNELS, 5, &cfg, &vb1, "Block2_ConvB1")?,
        );
        block.push(
            "Block2_ConvB2",
            basic(NIN_CHANNELS, NIN_CHANNELS, 1, &cfg, &vb1, "Block2_ConvB2")?,
        );
        block.push(
            "Block2_ConvB3",
            basic(NIN_CHANNELS, NIN_CHANNELS, 1, &cfg, &vb1, "Block2_ConvB3")?,
        );
        block.push("Block2_AvgPool", StageLayer::AvgPool(downsample()));
        block.push(
            "Block2_Encode",
            StageLayer::Encode(EncBlock::load(
                NIN_CHANNELS,
                NIN_CHANNELS,
                1,
                &cfg,
                vb1.pp("Block2_Encode"),
            )?),
        );
        blocks.push(block);

        for stage in 2..cfg.num_stages {
            let vbs = vb_blocks.pp(stage.to_string());
            let prefix = format!("Block{}", stage + 1);
            let mut block = FeatureBlock::new();
            for (suffix, kernel_size) in [("ConvB1", 3), ("ConvB2", 1), ("ConvB3", 1)] {
                let name = format!("{prefix}_{suffix}");
                let layer = basic(NIN_CHANNELS, NIN_CHANNELS, kernel_size, &cfg, &vbs, &name)?;
                block.push(name, layer);
            }
            if stage == 2 && cfg.num_stages > 3 && cfg.use_avg_on_conv3 {
                block.push("Block3_AvgPool", StageLayer::AvgPool(downsample()));
            }
            blocks.push(block);
        }

        let mut block = FeatureBlock::new();
        block.push("GlobalAveragePooling", StageLayer::GlobalAvgPool);
        blocks.push(block);

        let feature_names = cfg.feature_names();
        if feature_names.len() != blocks.len() {
            return Err(Error::ModelLoadError(format!(
                "{} feature names for {} blocks",
                feature_names.len(),
                blocks.len()
            )));
        }

        debug!(
            "Built NetworkInNetwork: {} stages, features {:?}",
            cfg.num_stages, feature_names
        );

        Ok(Self {
            cfg,
            bn_nat,
            bn_adv,
            blocks,
            feature_names,
        })
    }

    pub fn config(&self) -> &NinConfig {
        &self.cfg
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn blocks(&self) -> &[FeatureBlock] {
        &self.blocks
    }

    /// Normalize the input with the batch norm that matches its image type.
    pub fn aux_bn(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        let bn = match im_type {
            ImageType::Natural => &self.bn_nat,
            ImageType::Adversarial => &self.bn_adv,
        };
        Ok(bn.forward_t(x, train)?)
    }

    /// Sample the latent code from the `2 * C` channel encoding.
    ///
    /// The first `C` channels are the mean, the rest the log-variance:
    /// `z = eps * (exp(logvar / 2) * noise_scale) + mu` with `eps ~ N(0, 1)`.
    pub fn reparameterize(&self, encoded: &Tensor) -> Result<Tensor> {
        let channels = encoded.dim(1)?;
        if channels != 2 * NIN_CHANNELS {
            return Err(Error::InferenceError(format!(
                "Latent encoding must have {} channels, got {channels}",
                2 * NIN_CHANNELS
            )));
        }

        let mu = encoded.narrow(1, 0, NIN_CHANNELS)?;
        if self.cfg.latent_noise_scale == 0.0 {
            return Ok(mu);
        }
        let logvar = encoded.narrow(1, NIN_CHANNELS, channels - NIN_CHANNELS)?;
        let std = logvar.affine(0.5, 0.0)?.exp()?;
        let eps = std.randn_like(0.0, 1.0)?;
        let z = eps
            .mul(&std.affine(self.cfg.latent_noise_scale, 0.0)?)?
            .add(&mu)?;
        Ok(z)
    }

    /// Run the network and return the requested features in request order.
    ///
    /// `keys = None` returns only the classifier output. Requests are
    /// validated before any computation. A `conv2` output is the encoding
    /// before sampling (twice the latent width).
    pub fn forward_features(
        &self,
        x: &Tensor,
        im_type: ImageType,
        keys: Option<&[&str]>,
        train: bool,
    ) -> Result<Vec<Tensor>> {
        let request = FeatureRequest::parse(&self.feature_names, keys)?;
        self.check_input(x)?;

        let mut outputs: Vec<Option<Tensor>> = vec![None; request.len()];
        let mut feat = self.aux_bn(x, im_type, train)?;

        for (index, block) in self.blocks.iter().enumerate().take(ENCODER_BLOCKS) {
            feat = block.forward(&feat, train)?;
            if let Some(slot) = request.slot_of(index) {
                outputs[slot] = Some(feat.clone());
            }
        }

        feat = self.reparameterize(&feat)?;

        for (index, block) in self
            .blocks
            .iter()
            .enumerate()
            .take(request.max_index() + 1)
            .skip(ENCODER_BLOCKS)
        {
            feat = block.forward(&feat, train)?;
            if let Some(slot) = request.slot_of(index) {
                outputs[slot] = Some(feat.clone());
            }
        }

        outputs
            .into_iter()
            .zip(request.keys())
            .map(|(out, key)| {
                out.ok_or_else(|| Error::InferenceError(format!("Feature {key} was not computed")))
            })
            .collect()
    }

    /// Classifier features `(B, 192)`.
    pub fn forward(&self, x: &Tensor, im_type: ImageType, train: bool) -> Result<Tensor> {
        let mut feats = self.forward_features(x, im_type, None, train)?;
        feats
            .pop()
            .ok_or_else(|| Error::InferenceError("Classifier output missing".to_string()))
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let dims = x.dims();
        if dims.len() != 4 || dims[1] != self.cfg.in_channels {
            return Err(Error::InvalidInput(format!(
                "Expected input of shape (B, {}, H, W), got {:?}",
                self.cfg.in_channels, dims
            )));
        }
        Ok(())
    }
}

fn basic(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    cfg: &NinConfig,
    vb: &VarBuilder,
    name: &str,
) -> Result<StageLayer> {
    Ok(StageLayer::Basic(BasicBlock::load(
        in_channels,
        out_channels,
        kernel_size,
        cfg,
        vb.pp(name),
    )?))
}

fn downsample() -> Pool2dConfig {
    Pool2dConfig::new(3, 2).with_padding(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shared::weights::ParamStore;
    use candle_core::{DType, Device};

    fn build(cfg: NinConfig) -> (ParamStore, NetworkInNetwork) {
        let store = ParamStore::new(DType::F32, &Device::Cpu);
        let nin = NetworkInNetwork::load(cfg, store.var_builder()).unwrap();
        (store, nin)
    }

    fn deterministic() -> NinConfig {
        NinConfig {
            latent_noise_scale: 0.0,
            ..Default::default()
        }
    }

    fn input(batch: usize, size: usize) -> Tensor {
        Tensor::randn(0f32, 1f32, (batch, 3, size, size), &Device::Cpu).unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn layout_and_parameter_paths_follow_block_names() {
        let (store, nin) = build(NinConfig::default());
        assert_eq!(
            nin.feature_names(),
            &["conv1", "conv2", "conv3", "classifier"]
        );
        assert_eq!(
            nin.blocks()[1].layer_names().collect::<Vec<_>>(),
            vec![
                "Block2_ConvB1",
                "Block2_ConvB2",
                "Block2_ConvB3",
                "Block2_AvgPool",
                "Block2_Encode"
            ]
        );

        let names = store.parameter_names();
        for expected in [
            "bn_nat.weight",
            "bn_adv.running_mean",
            "_feature_blocks.0.Block1_ConvB1.layers.Conv.weight",
            "_feature_blocks.1.Block2_Encode.layers.BatchNorm.bias",
            "_feature_blocks.2.Block3_ConvB3.layers.Conv.weight",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn extra_stages_add_blocks_and_optional_pool() {
        let (_, nin) = build(NinConfig {
            num_stages: 5,
            ..Default::default()
        });
        assert_eq!(nin.blocks().len(), 6);
        assert_eq!(nin.feature_names()[4], "conv5");
        assert!(nin.blocks()[2].layer_names().any(|n| n == "Block3_AvgPool"));
        assert_eq!(
            nin.blocks()[4].layer_names().collect::<Vec<_>>(),
            vec!["Block5_ConvB1", "Block5_ConvB2", "Block5_ConvB3"]
        );

        let (_, nin) = build(NinConfig {
            num_stages: 4,
            use_avg_on_conv3: false,
            ..Default::default()
        });
        assert!(!nin.blocks()[2].layer_names().any(|n| n == "Block3_AvgPool"));
    }

    #[test]
    fn rejects_too_few_stages() {
        let store = ParamStore::new(DType::F32, &Device::Cpu);
        let cfg = NinConfig {
            num_stages: 2,
            ..Default::default()
        };
        assert!(matches!(
            NetworkInNetwork::load(cfg, store.var_builder()),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn forward_returns_classifier_features() -> Result<()> {
        let (_, nin) = build(NinConfig::default());
        let out = nin.forward(&input(2, 8), ImageType::Natural, false)?;
        assert_eq!(out.dims(), &[2, 192]);
        Ok(())
    }

    #[test]
    fn requested_features_come_back_in_request_order() -> Result<()> {
        let (_, nin) = build(deterministic());
        let x = input(2, 8);
        let feats = nin.forward_features(
            &x,
            ImageType::Natural,
            Some(&["classifier", "conv1", "conv3", "conv2"]),
            false,
        )?;
        assert_eq!(feats.len(), 4);
        assert_eq!(feats[0].dims(), &[2, 192]);
        assert_eq!(feats[1].dims(), &[2, 96, 4, 4]);
        assert_eq!(feats[2].dims(), &[2, 192, 2, 2]);
        assert_eq!(feats[3].dims(), &[2, 384, 2, 2]);

        // Stopping early computes the same intermediate features.
        let early = nin.forward_features(&x, ImageType::Natural, Some(&["conv1"]), false)?;
        assert_eq!(early.len(), 1);
        assert!(max_abs_diff(&early[0], &feats[1]) < 1e-6);
        Ok(())
    }

    #[test]
    fn deeper_networks_pool_after_third_stage() -> Result<()> {
        let (_, nin) = build(NinConfig {
            num_stages: 4,
            ..Default::default()
        });
        let feats = nin.forward_features(
            &input(1, 8),
            ImageType::Adversarial,
            Some(&["conv3", "conv4", "classifier"]),
            false,
        )?;
        assert_eq!(feats[0].dims(), &[1, 192, 1, 1]);
        assert_eq!(feats[1].dims(), &[1, 192, 1, 1]);
        assert_eq!(feats[2].dims(), &[1, 192]);
        Ok(())
    }

    #[test]
    fn invalid_requests_fail_before_compute() {
        let (_, nin) = build(NinConfig::default());
        let x = input(1, 8);
        for keys in [&[][..], &["conv7"][..], &["conv2", "conv2"][..]] {
            let err = nin
                .forward_features(&x, ImageType::Natural, Some(keys), false)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{keys:?}: {err}");
        }

        let wrong_channels = Tensor::zeros((1, 1, 8, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            nin.forward(&wrong_channels, ImageType::Natural, false),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn image_type_selects_auxiliary_batch_norm() -> Result<()> {
        let (store, nin) = build(deterministic());
        store.set("bn_adv.weight", &Tensor::full(3f32, 3, &Device::Cpu)?)?;

        let x = input(2, 8).abs()?;
        let nat = nin.aux_bn(&x, ImageType::Natural, false)?;
        let adv = nin.aux_bn(&x, ImageType::Adversarial, false)?;
        let ratio = adv
            .sum_all()?
            .to_scalar::<f32>()?
            / nat.sum_all()?.to_scalar::<f32>()?;
        assert!((ratio - 3.0).abs() < 1e-3, "ratio={ratio}");

        let nat_out = nin.forward(&x, ImageType::Natural, false)?;
        let adv_out = nin.forward(&x, ImageType::Adversarial, false)?;
        assert!(max_abs_diff(&nat_out, &adv_out) > 0.0);
        Ok(())
    }

    #[test]
    fn reparameterize_samples_around_the_mean() -> Result<()> {
        let (_, nin) = build(NinConfig::default());
        let mu = Tensor::randn(0f32, 1f32, (2, 192, 2, 2), &Device::Cpu)?;
        let logvar = Tensor::zeros((2, 192, 2, 2), DType::F32, &Device::Cpu)?;
        let encoded = Tensor::cat(&[&mu, &logvar], 1)?;

        let a = nin.reparameterize(&encoded)?;
        let b = nin.reparameterize(&encoded)?;
        assert_eq!(a.dims(), &[2, 192, 2, 2]);
        // std = 1, scaled by 1e-3: samples stay close to mu but differ.
        assert!(max_abs_diff(&a, &mu) < 0.01);
        assert!(max_abs_diff(&a, &b) > 0.0);

        let (_, exact) = build(deterministic());
        assert_eq!(max_abs_diff(&exact.reparameterize(&encoded)?, &mu), 0.0);

        let bad = Tensor::zeros((1, 100, 1, 1), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            nin.reparameterize(&bad),
            Err(Error::InferenceError(_))
        ));
        Ok(())
    }

    #[test]
    fn train_mode_uses_batch_statistics() -> Result<()> {
        let (_, nin) = build(deterministic());
        // Shifted inputs: batch statistics remove the offset, running ones do not.
        let x = input(4, 8).affine(1.0, 5.0)?;
        let normed = nin.aux_bn(&x, ImageType::Natural, true)?;
        let mean = normed.mean_all()?.to_scalar::<f32>()?;
        assert!(mean.abs() < 1e-3, "mean={mean}");

        let eval = nin.aux_bn(&x, ImageType::Natural, false)?;
        assert!(eval.mean_all()?.to_scalar::<f32>()? > 4.0);

        let out = nin.forward(&x, ImageType::Natural, true)?;
        let total = out.sum_all()?.to_scalar::<f32>()?;
        assert!(total.is_finite());
        Ok(())
    }

    #[test]
    fn train_pass_updates_only_the_selected_input_bn() -> Result<()> {
        let (store, nin) = build(deterministic());
        let x = input(4, 8).affine(1.0, 5.0)?;
        nin.forward(&x, ImageType::Natural, true)?;

        let vb = store.var_builder();
        let nat_mean = vb.get(3, "bn_nat.running_mean")?.to_vec1::<f32>()?;
        let adv_mean = vb.get(3, "bn_adv.running_mean")?.to_vec1::<f32>()?;
        let adv_var = vb.get(3, "bn_adv.running_var")?.to_vec1::<f32>()?;

        // momentum 0.1 towards a batch mean of about 5
        for m in &nat_mean {
            assert!((m - 0.5).abs() < 0.2, "nat running_mean={nat_mean:?}");
        }
        assert_eq!(adv_mean, vec![0.0; 3]);
        assert_eq!(adv_var, vec![1.0; 3]);

        nin.forward(&x, ImageType::Adversarial, false)?;
        let adv_mean = vb.get(3, "bn_adv.running_mean")?.to_vec1::<f32>()?;
        assert_eq!(adv_mean, vec![0.0; 3]);
        Ok(())
    }
}
