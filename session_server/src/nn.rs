use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

/// Clamp for probabilities inside the cross-entropy log.
const EPS: f64 = 1.0e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Sigmoid,
    /// Row-wise softmax, only valid on the output layer.
    Softmax,
}

impl Activation {
    fn apply(&self, mut z: Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv_inplace(|x| x.max(0.0)),
            Activation::Sigmoid => z.mapv_inplace(|x| 1.0 / (1.0 + (-x).exp())),
            Activation::Softmax => {
                for mut row in z.rows_mut() {
                    let max = row.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
                    row.mapv_inplace(|x| (x - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|x| x / sum);
                }
            }
        }
        z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loss {
    MeanSquaredError,
    CrossEntropy,
}

impl Loss {
    /// Mean loss over a batch of predictions and one-hot or numeric targets.
    pub fn compute(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        let rows = predictions.nrows().max(1) as f64;
        match self {
            Loss::MeanSquaredError => {
                let diff = predictions - targets;
                diff.mapv(|d| d * d).sum() / (rows * predictions.ncols().max(1) as f64)
            }
            Loss::CrossEntropy => {
                let log_likelihood: f64 = predictions
                    .iter()
                    .zip(targets.iter())
                    .map(|(p, t)| t * p.clamp(EPS, 1.0).ln())
                    .sum();
                -log_likelihood / rows
            }
        }
    }
}

/// Fully connected layer, weights are `[outputs, inputs]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
}

impl Dense {
    pub fn new(inputs: usize, outputs: usize, activation: Activation, rng: &mut StdRng) -> Self {
        // He initialization for ReLU, Xavier for the rest
        let limit = match activation {
            Activation::Relu => (6.0 / inputs as f64).sqrt(),
            _ => (6.0 / (inputs + outputs) as f64).sqrt(),
        };
        let weights = Array2::from_shape_fn((outputs, inputs), |_| rng.random_range(-limit..limit));
        Self {
            weights,
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weights.nrows()
    }

    fn forward(&self, input: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let z = input.dot(&self.weights.t()) + &self.bias;
        let a = self.activation.apply(z.clone());
        (z, a)
    }
}

/// Gradients of one dense layer.
#[derive(Debug, Clone)]
pub struct DenseGrad {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

/// Small feed-forward network: one hidden ReLU layer and a task specific output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Dense>,
    loss: Loss,
}

impl Network {
    /// Regression network with sigmoid outputs, trained against targets scaled to `[0, 1]`.
    pub fn regression(inputs: usize, hidden: usize, outputs: usize, rng: &mut StdRng) -> Self {
        Self {
            layers: vec![
                Dense::new(inputs, hidden, Activation::Relu, rng),
                Dense::new(hidden, outputs, Activation::Sigmoid, rng),
            ],
            loss: Loss::MeanSquaredError,
        }
    }

    /// Classification network with one softmax output per class.
    pub fn classification(inputs: usize, hidden: usize, classes: usize, rng: &mut StdRng) -> Self {
        Self {
            layers: vec![
                Dense::new(inputs, hidden, Activation::Relu, rng),
                Dense::new(hidden, classes, Activation::Softmax, rng),
            ],
            loss: Loss::CrossEntropy,
        }
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(Dense::inputs).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(Dense::outputs).unwrap_or(0)
    }

    /// Run a batch `[rows, inputs]` through the network.
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(&x).1)
    }

    /// Forward and backward pass over one batch. Returns the batch loss and
    /// the gradients of every layer, in layer order.
    pub fn backprop(&self, input: &Array2<f64>, targets: &Array2<f64>) -> (f64, Vec<DenseGrad>) {
        // (layer input, pre-activation) per layer
        let mut cache = Vec::with_capacity(self.layers.len());
        let mut x = input.clone();
        for layer in &self.layers {
            let (z, a) = layer.forward(&x);
            cache.push((x, z));
            x = a;
        }
        let predictions = x;
        let loss = self.loss.compute(&predictions, targets);

        let rows = input.nrows().max(1) as f64;
        let mut delta = match self.loss {
            // Softmax combined with cross-entropy has the plain residual as gradient.
            Loss::CrossEntropy => (&predictions - targets) / rows,
            Loss::MeanSquaredError => {
                let scale = 2.0 / (rows * predictions.ncols().max(1) as f64);
                (&predictions - targets) * scale
            }
        };

        let mut grads = Vec::with_capacity(self.layers.len());
        for (layer, (layer_input, z)) in self.layers.iter().zip(cache.iter()).rev() {
            match layer.activation {
                Activation::Relu => {
                    delta = delta * z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                }
                Activation::Sigmoid if self.loss == Loss::MeanSquaredError => {
                    let s = Activation::Sigmoid.apply(z.clone());
                    delta = delta * s.mapv(|v| v * (1.0 - v));
                }
                _ => (),
            }
            grads.push(DenseGrad {
                weights: delta.t().dot(layer_input),
                bias: delta.sum_axis(Axis(0)),
            });
            delta = delta.dot(&layer.weights);
        }
        grads.reverse();

        (loss, grads)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    #[default]
    Adam,
}

/// Parameter update rule with per-layer state.
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    steps: i32,
    moments: Vec<(DenseGrad, DenseGrad)>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64, network: &Network) -> Self {
        let zeros = |layer: &Dense| DenseGrad {
            weights: Array2::zeros(layer.weights.raw_dim()),
            bias: Array1::zeros(layer.bias.raw_dim()),
        };
        Self {
            kind,
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1.0e-8,
            steps: 0,
            moments: network
                .layers()
                .iter()
                .map(|layer| (zeros(layer), zeros(layer)))
                .collect(),
        }
    }

    pub fn step(&mut self, network: &mut Network, grads: &[DenseGrad]) {
        self.steps += 1;
        let lr = self.learning_rate;

        match self.kind {
            OptimizerKind::Sgd => {
                for (layer, grad) in network.layers_mut().iter_mut().zip(grads) {
                    layer.weights.scaled_add(-lr, &grad.weights);
                    layer.bias.scaled_add(-lr, &grad.bias);
                }
            }
            OptimizerKind::Adam => {
                let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
                let m_hat = 1.0 - b1.powi(self.steps);
                let v_hat = 1.0 - b2.powi(self.steps);
                let update = |m: &f64, v: &f64| lr * (m / m_hat) / ((v / v_hat).sqrt() + eps);

                for ((layer, grad), (m, v)) in network
                    .layers_mut()
                    .iter_mut()
                    .zip(grads)
                    .zip(self.moments.iter_mut())
                {
                    m.weights = &m.weights * b1 + &grad.weights * (1.0 - b1);
                    v.weights = &v.weights * b2 + grad.weights.mapv(|g| g * g) * (1.0 - b2);
                    m.bias = &m.bias * b1 + &grad.bias * (1.0 - b1);
                    v.bias = &v.bias * b2 + grad.bias.mapv(|g| g * g) * (1.0 - b2);

                    ndarray::Zip::from(&mut layer.weights)
                        .and(&m.weights)
                        .and(&v.weights)
                        .for_each(|w, m, v| *w -= update(m, v));
                    ndarray::Zip::from(&mut layer.bias)
                        .and(&m.bias)
                        .and(&v.bias)
                        .for_each(|b, m, v| *b -= update(m, v));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn softmax_rows_sum_to_one() {
        let out = Activation::Softmax.apply(array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 0.0]]);
        for row in out.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((out[[1, 0]] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn forward_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = Network::classification(34, 16, 4, &mut rng);
        let out = net.forward(&Array2::zeros((5, 34)));
        assert_eq!(out.dim(), (5, 4));
        assert_eq!(net.input_dim(), 34);
        assert_eq!(net.output_dim(), 4);
    }

    /// Compare analytic gradients with central differences.
    fn check_gradients(mut net: Network, input: Array2<f64>, targets: Array2<f64>) {
        let (_, grads) = net.backprop(&input, &targets);
        let h = 1e-6;
        for layer_idx in 0..net.layers().len() {
            let (rows, cols) = net.layers()[layer_idx].weights.dim();
            for i in 0..rows {
                for j in 0..cols {
                    net.layers_mut()[layer_idx].weights[[i, j]] += h;
                    let plus = net.loss().compute(&net.forward(&input), &targets);
                    net.layers_mut()[layer_idx].weights[[i, j]] -= 2.0 * h;
                    let minus = net.loss().compute(&net.forward(&input), &targets);
                    net.layers_mut()[layer_idx].weights[[i, j]] += h;

                    let numeric = (plus - minus) / (2.0 * h);
                    let analytic = grads[layer_idx].weights[[i, j]];
                    assert!(
                        (numeric - analytic).abs() < 1e-5,
                        "layer {layer_idx} [{i},{j}]: {numeric} vs {analytic}"
                    );
                }
            }
        }
    }

    #[test]
    fn regression_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = Network::regression(2, 5, 3, &mut rng);
        let input = array![[0.1, 0.9], [0.8, 0.3], [0.5, 0.5]];
        let targets = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.5, 0.0, 0.5]];
        check_gradients(net, input, targets);
    }

    #[test]
    fn classification_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let net = Network::classification(3, 4, 3, &mut rng);
        let input = array![[0.1, 0.9, 0.4], [0.8, 0.3, 0.2]];
        let targets = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        check_gradients(net, input, targets);
    }

    #[test]
    fn optimizers_reduce_loss() {
        for kind in [OptimizerKind::Sgd, OptimizerKind::Adam] {
            let mut rng = StdRng::seed_from_u64(3);
            let mut net = Network::regression(1, 8, 1, &mut rng);
            let input = array![[0.0], [0.25], [0.75], [1.0]];
            let targets = array![[1.0], [0.75], [0.25], [0.0]];
            let mut optimizer = Optimizer::new(kind, 0.1, &net);

            let (initial, _) = net.backprop(&input, &targets);
            for _ in 0..200 {
                let (_, grads) = net.backprop(&input, &targets);
                optimizer.step(&mut net, &grads);
            }
            let (trained, _) = net.backprop(&input, &targets);
            assert!(trained < initial, "{kind:?}: {trained} >= {initial}");
        }
    }
}
