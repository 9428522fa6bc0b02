//! Perceptual loss modeler for fast style transfer
//!
//! A transform network turns content images into stylized images. The loss compares
//! activations of a pretrained feature network (VGG-19) on the stylized output against
//! the content image (content loss) and against Gram matrices of a single style image
//! (style loss), plus a total variation smoothness term and L2 weight decay.
//!
//! The feature network's weights are loaded lazily from `feature_net_path` the first time
//! it is evaluated, and never again for the lifetime of the modeler.

use std::collections::BTreeMap;

use super::{Loss, ModelOutput, Modeler, ModelerBase};
use crate::{
    augmenter::vgg_preprocessing::channel_means,
    checkpoint::Checkpoint,
    config::{ModelerConfig, Mode},
    error::Error,
    image_io::{self, RawImage},
    inputter::Batch,
    network::{NetOutput, Network, vgg},
    nn::Variable,
    registry::Components,
    tensor::{DataFormat, Tensor, TensorError},
    values::Value,
};

pub const STYLE_LAYERS: [&str; 5] = [
    "vgg_19/conv1/conv1_1",
    "vgg_19/conv2/conv2_1",
    "vgg_19/conv3/conv3_1",
    "vgg_19/conv4/conv4_1",
    "vgg_19/conv5/conv5_1",
];
pub const CONTENT_LAYER: &str = "vgg_19/conv4/conv4_2";

/// Number of elements per example
pub fn tensor_size(tensor: &Tensor) -> usize {
    tensor.size_per_example()
}

/// Gram matrix of a rank 4 feature map, `[B, C, C]` normalized by `H * W * C`
pub fn compute_gram(feature: &Tensor, data_format: DataFormat) -> Result<Tensor, TensorError> {
    let dims = data_format.dims(feature.shape())?;
    let size = (dims.height * dims.width * dims.channels).max(1) as f32;
    let hw = dims.height * dims.width;
    let gram = match data_format {
        DataFormat::ChannelsLast => {
            let feats = feature.reshape(vec![dims.batch, hw, dims.channels])?;
            feats.transpose_last2()?.matmul(&feats)?
        }
        DataFormat::ChannelsFirst => {
            let feats = feature.reshape(vec![dims.batch, dims.channels, hw])?;
            feats.matmul(&feats.transpose_last2()?)?
        }
    };
    Ok(gram.mul_scalar(1.0 / size))
}

// `loss / size` where an empty slice contributes nothing
fn normalized(loss: Value, size: usize) -> Value {
    if size == 0 {
        return Value::new(0.0);
    }
    loss.scale(1.0 / size as f32)
}

/// `tv_weight * 2 * (x_tv / x_size + y_tv / y_size) / batch_size`
pub fn compute_tv_loss(
    outputs: &Tensor,
    data_format: DataFormat,
    tv_weight: f32,
    batch_size: usize,
) -> Result<Value, TensorError> {
    let dims = data_format.dims(outputs.shape())?;
    let (h_axis, w_axis) = (data_format.height_axis(), data_format.width_axis());

    let y_next = outputs.slice_axis(h_axis, 1.min(dims.height), dims.height)?;
    let y_prev = outputs.slice_axis(h_axis, 0, dims.height.saturating_sub(1))?;
    let x_next = outputs.slice_axis(w_axis, 1.min(dims.width), dims.width)?;
    let x_prev = outputs.slice_axis(w_axis, 0, dims.width.saturating_sub(1))?;

    let y_tv = normalized(y_next.sub(&y_prev)?.l2_loss(), tensor_size(&y_next));
    let x_tv = normalized(x_next.sub(&x_prev)?.l2_loss(), tensor_size(&x_next));
    Ok((x_tv + y_tv).scale(tv_weight * 2.0 / batch_size.max(1) as f32))
}

/// `content_weight * 2 * l2_loss(source - target) / (tensor_size(source) * batch_size)`
pub fn compute_content_loss(
    source: &Tensor,
    target: &Tensor,
    content_weight: f32,
    batch_size: usize,
) -> Result<Value, TensorError> {
    let l2 = source.sub(target)?.l2_loss().scale(2.0);
    Ok(normalized(l2, tensor_size(source) * batch_size).scale(content_weight))
}

/// `style_weight * sum(2 * l2_loss(gram_source - gram_target) / tensor_size(gram_target))`
/// divided by `batch_size`. Targets with a batch of one are shared by every example.
pub fn compute_style_loss(
    sources: &[Tensor],
    targets: &[Tensor],
    style_weight: f32,
    batch_size: usize,
) -> Result<Value, TensorError> {
    let mut terms = Vec::with_capacity(sources.len());
    for (source, target) in sources.iter().zip(targets) {
        let style_size = tensor_size(target);
        let target = match (target.shape().first(), source.shape().first()) {
            (Some(1), Some(&n)) if n != 1 => target.repeat_batch(n)?,
            _ => target.clone(),
        };
        terms.push(normalized(source.sub(&target)?.l2_loss().scale(2.0), style_size));
    }
    Ok(Value::sum_of(terms).scale(style_weight / batch_size.max(1) as f32))
}

/// Shifts pixel values from `0..=255` into the mean centred range the feature net expects
pub fn subtract_rgb_mean(outputs: &Tensor, data_format: DataFormat) -> Result<Tensor, Error> {
    let dims = data_format.dims(outputs.shape())?;
    let axis = data_format.channel_axis();
    let channels = outputs
        .split(axis, dims.channels)?
        .into_iter()
        .zip(channel_means(dims.channels)?)
        .map(|(channel, mean)| channel.add_scalar(-mean))
        .collect::<Vec<_>>();
    Ok(Tensor::concat(&channels, axis)?)
}

pub struct StyleTransferModeler {
    base: ModelerBase,
    net: Box<dyn Network>,
    feature_net: Box<dyn Network>,
    feature_net_init_flag: bool,
    feature_net_restores: usize,
    style_features_target: Option<BTreeMap<String, Tensor>>,
}

impl StyleTransferModeler {
    pub fn new(
        config: &ModelerConfig,
        net: Box<dyn Network>,
        feature_net: Box<dyn Network>,
    ) -> Result<Self, Error> {
        let base = ModelerBase::new(config, vec![vgg::SCOPE.to_string()], vec![])?;
        Ok(Self {
            base,
            net,
            feature_net,
            feature_net_init_flag: config.mode != Mode::Infer,
            feature_net_restores: 0,
            style_features_target: None,
        })
    }

    pub fn feature_net_init_flag(&self) -> bool {
        self.feature_net_init_flag
    }

    /// How many times the feature net weights were loaded, at most once
    pub fn feature_net_restores(&self) -> usize {
        self.feature_net_restores
    }

    pub fn style_features_target(&self) -> Option<&BTreeMap<String, Tensor>> {
        self.style_features_target.as_ref()
    }

    /// Evaluates the feature net, loading its pretrained weights on first use
    fn run_feature_net(&mut self, images: &Tensor) -> Result<NetOutput, Error> {
        if self.feature_net_init_flag {
            let path = self.base.config.feature_net_path.as_ref().ok_or_else(|| {
                Error::InvalidState(
                    "feature_net_path is required to initialise the feature net".into(),
                )
            })?;
            log::info!("Restoring weights from {}", path.display());
            let checkpoint = Checkpoint::load(path)?;
            let n_restored = self.feature_net.restore(&checkpoint, &[vgg::SCOPE])?;
            log::debug!("restored {} feature net variables", n_restored);
            log::info!("Weights restored.");
            self.feature_net_init_flag = false;
            self.feature_net_restores += 1;
        }
        Ok(self
            .feature_net
            .forward(images, self.base.config.data_format, false)?)
    }

    fn end_point<'a>(&self, output: &'a NetOutput, name: &str) -> Result<&'a Tensor, Error> {
        Ok(output.end_point(self.feature_net.name(), name)?)
    }

    /// Gram matrices of the style image at every style layer, detached from the graph
    pub fn compute_style_feature(&mut self) -> Result<BTreeMap<String, Tensor>, Error> {
        let config = &self.base.config;
        let path = config.style_image_path.clone().ok_or_else(|| {
            Error::InvalidState("style_image_path is required to compute style targets".into())
        })?;
        let data_format = config.data_format;
        let style_image = RawImage::load(&path, config.image_depth)?;
        let style_image = style_image.subtract_mean(&channel_means(style_image.channels)?)?;
        // a batch of one
        let style_image = image_io::stack(&[style_image], data_format)?;

        let features = self.run_feature_net(&style_image)?;
        let mut targets = BTreeMap::new();
        for layer in STYLE_LAYERS {
            let gram = compute_gram(self.end_point(&features, layer)?, data_format)?;
            targets.insert(layer.to_string(), gram.detach());
        }
        Ok(targets)
    }
}

impl Modeler for StyleTransferModeler {
    fn name(&self) -> &str {
        "style_transfer"
    }

    fn base(&self) -> &ModelerBase {
        &self.base
    }

    fn variables(&self) -> Vec<Variable> {
        self.net
            .variables()
            .into_iter()
            .chain(self.feature_net.variables())
            .collect()
    }

    fn create_precomputation(&mut self) -> Result<(), Error> {
        if self.base.config.mode == Mode::Infer {
            return Ok(());
        }
        self.style_features_target = Some(self.compute_style_feature()?);
        log::info!("Computed style targets for {} layers", STYLE_LAYERS.len());
        Ok(())
    }

    fn create_graph_fn(&self, inputs: &Tensor) -> Result<NetOutput, Error> {
        let is_training = self.base.config.mode != Mode::Infer;
        Ok(self
            .net
            .forward(inputs, self.base.config.data_format, is_training)?)
    }

    fn create_loss_fn(&mut self, outputs: &Tensor, batch: &Batch) -> Result<Loss, Error> {
        let config = self.base.config.clone();
        let data_format = config.data_format;
        let batch_size = data_format.dims(outputs.shape())?.batch;
        let style_targets = self.style_features_target.clone().ok_or_else(|| {
            Error::InvalidState("style targets are missing, run create_precomputation first".into())
        })?;

        let target_net = self.run_feature_net(&batch.inputs)?;
        let content_target = self.end_point(&target_net, CONTENT_LAYER)?.detach();

        let outputs_mean_subtracted = subtract_rgb_mean(outputs, data_format)?;
        let source_net = self.run_feature_net(&outputs_mean_subtracted)?;
        let content_source = self.end_point(&source_net, CONTENT_LAYER)?;

        let mut style_sources = Vec::with_capacity(STYLE_LAYERS.len());
        let mut style_targets_ordered = Vec::with_capacity(STYLE_LAYERS.len());
        for layer in STYLE_LAYERS {
            style_sources.push(compute_gram(self.end_point(&source_net, layer)?, data_format)?);
            let target = style_targets.get(layer).ok_or_else(|| {
                Error::InvalidState(format!("no style target for {}", layer))
            })?;
            style_targets_ordered.push(target.clone());
        }

        let loss_content = compute_content_loss(
            content_source,
            &content_target,
            config.content_weight,
            batch_size,
        )?;
        let loss_style = compute_style_loss(
            &style_sources,
            &style_targets_ordered,
            config.style_weight,
            batch_size,
        )?;
        let loss_tv = compute_tv_loss(outputs, data_format, config.tv_weight, batch_size)?;
        let loss_l2 = self.base.l2_regularization(&self.train_variables());

        let terms = BTreeMap::from([
            ("loss_content".to_string(), loss_content.data()),
            ("loss_style".to_string(), loss_style.data()),
            ("loss_tv".to_string(), loss_tv.data()),
            ("loss_l2".to_string(), loss_l2.data()),
        ]);
        let total = Value::sum_of([&loss_l2, &loss_content, &loss_style, &loss_tv]);
        Ok(Loss { total, terms })
    }

    fn create_eval_metrics_fn(
        &self,
        _predictions: &Tensor,
        _labels: Option<&Tensor>,
    ) -> BTreeMap<String, f32> {
        BTreeMap::new()
    }

    fn model_fn(&mut self, batch: &Batch) -> Result<ModelOutput, Error> {
        let outputs = self.create_graph_fn(&batch.inputs)?.logits;
        if self.base.config.mode == Mode::Infer {
            return Ok(ModelOutput {
                loss: None,
                predictions: outputs,
                metrics: BTreeMap::new(),
            });
        }
        let loss = self.create_loss_fn(&outputs, batch)?;
        Ok(ModelOutput {
            loss: Some(loss.total),
            predictions: outputs,
            metrics: loss.terms,
        })
    }
}

pub fn build(
    config: &ModelerConfig,
    net: Box<dyn Network>,
    components: &Components,
) -> Result<Box<dyn Modeler>, Error> {
    let feature_net = components.networks.get(&config.feature_net)?(&config.network)?;
    Ok(Box::new(StyleTransferModeler::new(config, net, feature_net)?))
}
