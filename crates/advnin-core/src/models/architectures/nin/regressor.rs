//! Two-branch regressor over a shared NetworkInNetwork backbone.

use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};
use tracing::debug;

use crate::config::RegressorConfig;
use crate::error::Result;
use crate::models::shared::image_type::ImageType;
use crate::models::shared::layers::linear_zero_bias;

use super::NetworkInNetwork;

/// Outputs of a full regressor pass.
#[derive(Debug, Clone)]
pub struct RegressorOutput {
    /// Classifier features of the first input, `(B, 192)`
    pub features1: Tensor,
    /// Classifier features of the second input, `(B, 192)`
    pub features2: Tensor,
    /// `fc` applied to both feature sets concatenated, `(B, num_classes)`
    pub logits: Tensor,
    /// `fc2` applied to the same concatenation
    pub logits2: Tensor,
}

pub struct Regressor {
    cfg: RegressorConfig,
    nin: NetworkInNetwork,
    fc: Linear,
    fc2: Linear,
}

impl Regressor {
    pub fn load(cfg: RegressorConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let nin = NetworkInNetwork::load(cfg.nin.clone(), vb.pp("nin"))?;
        let fc = linear_zero_bias(cfg.indim, cfg.num_classes, vb.pp("fc"))?;
        let fc2 = linear_zero_bias(cfg.indim, cfg.num_classes, vb.pp("fc2"))?;
        debug!(
            "Built Regressor: indim={}, num_classes={}",
            cfg.indim, cfg.num_classes
        );
        Ok(Self { cfg, nin, fc, fc2 })
    }

    pub fn config(&self) -> &RegressorConfig {
        &self.cfg
    }

    pub fn backbone(&self) -> &NetworkInNetwork {
        &self.nin
    }

    /// Run both inputs through the backbone and both heads.
    pub fn forward(
        &self,
        x1: &Tensor,
        x2: &Tensor,
        im_type1: ImageType,
        im_type2: ImageType,
        train: bool,
    ) -> Result<RegressorOutput> {
        let features1 = self.nin.forward(x1, im_type1, train)?;
        let features2 = self.nin.forward(x2, im_type2, train)?;
        let joint = Tensor::cat(&[&features1, &features2], 1)?;
        let logits = self.fc.forward(&joint)?;
        let logits2 = self.fc2.forward(&joint)?;
        Ok(RegressorOutput {
            features1,
            features2,
            logits,
            logits2,
        })
    }

    /// Return the requested backbone features of both inputs; the heads are
    /// not evaluated.
    pub fn forward_features(
        &self,
        x1: &Tensor,
        x2: &Tensor,
        im_type1: ImageType,
        im_type2: ImageType,
        keys: &[&str],
        train: bool,
    ) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        let feats1 = self.nin.forward_features(x1, im_type1, Some(keys), train)?;
        let feats2 = self.nin.forward_features(x2, im_type2, Some(keys), train)?;
        Ok((feats1, feats2))
    }
}
