//! Batch and task-data plumbing
//!
//! Training consumes fixed-size `(inputs, labels)` batches; Fisher estimation
//! consumes single samples drawn from a task's validation split without
//! replacement. A synthetic permuted-feature task generator stands in for a
//! real dataset collaborator: every task shares the same class geometry but
//! sees the input features under a task-specific permutation, so tasks are
//! equally hard yet mutually incompatible (the classic permuted-pixels
//! construction).

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::config::{DataConfig, NetworkConfig};
use crate::error::{Error, Result};

/// One batch of classification data
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input features, shape `(batch, input_size)`
    pub inputs: Tensor,
    /// Ground-truth class indices, shape `(batch,)`, dtype u32
    pub labels: Tensor,
}

impl Batch {
    /// Create a batch, validating shapes
    pub fn new(inputs: Tensor, labels: Tensor) -> Result<Self> {
        if inputs.dims().len() != 2 {
            return Err(Error::invalid_input("batch inputs must be 2-D"));
        }
        if labels.dims().len() != 1 {
            return Err(Error::invalid_input("batch labels must be 1-D"));
        }
        if inputs.dims()[0] != labels.dims()[0] {
            return Err(Error::invalid_input(format!(
                "batch size disagreement: {} inputs vs {} labels",
                inputs.dims()[0],
                labels.dims()[0]
            )));
        }
        if labels.dtype() != DType::U32 {
            return Err(Error::invalid_input("batch labels must be u32 class indices"));
        }
        Ok(Self { inputs, labels })
    }

    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Train/validation/test splits for one task
#[derive(Debug, Clone)]
pub struct TaskData {
    /// Training batches
    pub train: Vec<Batch>,
    /// Validation split as a single batch (the Fisher sampling pool)
    pub validation: Batch,
    /// Test batches
    pub test: Vec<Batch>,
}

impl TaskData {
    /// Create task data, rejecting empty splits
    pub fn new(train: Vec<Batch>, validation: Batch, test: Vec<Batch>) -> Result<Self> {
        if train.is_empty() || train.iter().any(Batch::is_empty) {
            return Err(Error::invalid_input("task has no training data"));
        }
        if validation.is_empty() {
            return Err(Error::invalid_input("task has no validation data"));
        }
        if test.is_empty() || test.iter().any(Batch::is_empty) {
            return Err(Error::invalid_input("task has no test data"));
        }
        Ok(Self {
            train,
            validation,
            test,
        })
    }

    /// Total number of test samples
    pub fn test_sample_count(&self) -> usize {
        self.test.iter().map(Batch::len).sum()
    }

    /// Sampler over the validation split in a fresh random order
    pub fn fisher_sampler(&self, rng: &mut StdRng) -> Result<ValidationSampler> {
        ValidationSampler::new(&self.validation, rng)
    }
}

/// Source of single input samples for Fisher estimation
pub trait SampleSource {
    /// Draw the next sample as a `(1, input_size)` tensor.
    ///
    /// Draws are without replacement; an exhausted source fails rather than
    /// silently re-drawing.
    fn draw(&mut self) -> Result<Tensor>;

    /// Samples left before the source is exhausted
    fn remaining(&self) -> usize;
}

/// Without-replacement sampler over a validation batch
#[derive(Debug)]
pub struct ValidationSampler {
    inputs: Tensor,
    order: Vec<usize>,
    cursor: usize,
}

impl ValidationSampler {
    /// Create a sampler visiting the batch rows in a shuffled order
    pub fn new(validation: &Batch, rng: &mut StdRng) -> Result<Self> {
        if validation.is_empty() {
            return Err(Error::invalid_input("validation batch is empty"));
        }
        let mut order: Vec<usize> = (0..validation.len()).collect();
        order.shuffle(rng);
        Ok(Self {
            inputs: validation.inputs.clone(),
            order,
            cursor: 0,
        })
    }
}

impl SampleSource for ValidationSampler {
    fn draw(&mut self) -> Result<Tensor> {
        let Some(&row) = self.order.get(self.cursor) else {
            return Err(Error::InsufficientSamples {
                requested: self.cursor + 1,
                available: self.order.len(),
            });
        };
        self.cursor += 1;
        Ok(self.inputs.narrow(0, row, 1)?)
    }

    fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }
}

/// Generator for a sequence of permuted-feature classification tasks.
///
/// Class centers are drawn once; each task re-samples points around those
/// centers and applies its own feature permutation (the identity for the
/// first task).
#[derive(Debug)]
pub struct SyntheticTasks {
    network: NetworkConfig,
    data: DataConfig,
    batch_size: usize,
    centers: Vec<Vec<f32>>,
}

impl SyntheticTasks {
    /// Create a generator with freshly drawn class centers
    pub fn new(
        network: &NetworkConfig,
        data: &DataConfig,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid_input("batch size must be > 0"));
        }
        let normal = Normal::new(0.0f32, 1.0)
            .map_err(|e| Error::internal(format!("invalid normal distribution: {e}")))?;

        let mut centers = Vec::with_capacity(network.output_size);
        for _ in 0..network.output_size {
            let mut direction: Vec<f32> =
                (0..network.input_size).map(|_| normal.sample(rng)).collect();
            let norm = direction.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
            for value in &mut direction {
                *value *= data.class_separation / norm;
            }
            centers.push(direction);
        }

        Ok(Self {
            network: network.clone(),
            data: data.clone(),
            batch_size,
            centers,
        })
    }

    /// Generate the data for one task.
    ///
    /// The first task keeps the natural feature order; later tasks draw a
    /// fresh permutation applied identically to every split.
    pub fn task(&self, first_task: bool, device: &Device, rng: &mut StdRng) -> Result<TaskData> {
        let permutation: Vec<usize> = if first_task {
            (0..self.network.input_size).collect()
        } else {
            let mut p: Vec<usize> = (0..self.network.input_size).collect();
            p.shuffle(rng);
            p
        };

        let train = self.split(self.data.train_samples, &permutation, device, rng)?;
        let validation =
            self.one_batch(self.data.validation_samples, &permutation, device, rng)?;
        let test = self.split(self.data.test_samples, &permutation, device, rng)?;

        debug!(
            train_batches = train.len(),
            validation_samples = validation.len(),
            test_batches = test.len(),
            "generated synthetic task"
        );
        TaskData::new(train, validation, test)
    }

    /// Generate a full task sequence
    pub fn sequence(
        &self,
        num_tasks: usize,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Vec<TaskData>> {
        if num_tasks == 0 {
            return Err(Error::invalid_input("task count must be > 0"));
        }
        (0..num_tasks)
            .map(|index| self.task(index == 0, device, rng))
            .collect()
    }

    fn split(
        &self,
        samples: usize,
        permutation: &[usize],
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Vec<Batch>> {
        let mut batches = Vec::new();
        let mut start = 0;
        while start < samples {
            let len = self.batch_size.min(samples - start);
            batches.push(self.one_batch(len, permutation, device, rng)?);
            start += len;
        }
        Ok(batches)
    }

    fn one_batch(
        &self,
        samples: usize,
        permutation: &[usize],
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Batch> {
        if samples == 0 {
            return Err(Error::invalid_input("cannot build an empty batch"));
        }
        let noise = Normal::new(0.0f32, self.data.noise_stdev)
            .map_err(|e| Error::internal(format!("invalid noise distribution: {e}")))?;

        let classes = self.centers.len();
        let mut inputs = Vec::with_capacity(samples * self.network.input_size);
        let mut labels = Vec::with_capacity(samples);

        for _ in 0..samples {
            let class = rng.random_range(0..classes);
            let center = &self.centers[class];
            let point: Vec<f32> = center.iter().map(|&c| c + noise.sample(rng)).collect();
            // Feature j of the permuted sample is source feature
            // permutation[j].
            inputs.extend(permutation.iter().map(|&src| point[src]));
            labels.push(class as u32);
        }

        let inputs = Tensor::from_vec(inputs, (samples, self.network.input_size), device)?;
        let labels = Tensor::from_vec(labels, samples, device)?;
        Batch::new(inputs, labels)
    }
}
