//! Stacked LSTM layers run over a whole input window.

use ndarray::Array2;
use rand::Rng;

use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::optimizers::Optimizer;

/// Cached values for every timestep and layer of a sequence forward pass,
/// indexed as `steps[t][layer]`
#[derive(Clone, Debug)]
pub struct LSTMSequenceCache {
    pub steps: Vec<Vec<LSTMCellCache>>,
}

/// Multi-layer LSTM network for sequence modeling
///
/// Stacks multiple LSTM cells where the output of layer i becomes
/// the input to layer i+1.
#[derive(Clone, Debug)]
pub struct LSTMNetwork {
    cells: Vec<LSTMCell>,
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
}

impl LSTMNetwork {
    /// Creates a new multi-layer LSTM network
    ///
    /// First layer accepts `input_size` dimensions, subsequent layers
    /// accept `hidden_size` dimensions from the previous layer.
    pub fn new(input_size: usize, hidden_size: usize, num_layers: usize) -> Self {
        Self::with_rng(input_size, hidden_size, num_layers, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, num_layers: usize, rng: &mut R) -> Self {
        let cells = (0..num_layers)
            .map(|i| {
                let layer_input_size = if i == 0 { input_size } else { hidden_size };
                LSTMCell::with_rng(layer_input_size, hidden_size, rng)
            })
            .collect();

        LSTMNetwork {
            cells,
            input_size,
            hidden_size,
            num_layers,
        }
    }

    /// Creates a network from existing cells (used for deserialization)
    pub fn from_cells(cells: Vec<LSTMCell>, input_size: usize, hidden_size: usize) -> Self {
        let num_layers = cells.len();
        LSTMNetwork {
            cells,
            input_size,
            hidden_size,
            num_layers,
        }
    }

    /// Get reference to the cells (used for serialization)
    pub fn get_cells(&self) -> &[LSTMCell] {
        &self.cells
    }

    /// Single-timestep forward through all layers with explicit per-layer state
    pub fn forward(&self, input: &Array2<f64>, hx: &[Array2<f64>], cx: &[Array2<f64>]) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let (hy, cy, _) = self.forward_with_cache(input, hx, cx);
        (hy, cy)
    }

    /// Single-timestep forward with caching for training
    pub fn forward_with_cache(&self, input: &Array2<f64>, hx: &[Array2<f64>], cx: &[Array2<f64>]) -> (Vec<Array2<f64>>, Vec<Array2<f64>>, Vec<LSTMCellCache>) {
        let mut current_input = input.clone();
        let mut hy = Vec::with_capacity(self.num_layers);
        let mut cy = Vec::with_capacity(self.num_layers);
        let mut caches = Vec::with_capacity(self.num_layers);

        for (layer, cell) in self.cells.iter().enumerate() {
            let (new_h, new_c, cache) = cell.forward_with_cache(&current_input, &hx[layer], &cx[layer]);
            caches.push(cache);

            // Layer i+1 input is layer i hidden output
            current_input = new_h.clone();
            hy.push(new_h);
            cy.push(new_c);
        }

        (hy, cy, caches)
    }

    fn zero_state(&self, batch_size: usize) -> Vec<Array2<f64>> {
        vec![Array2::zeros((self.hidden_size, batch_size)); self.num_layers]
    }

    /// Runs a whole sequence from a zero state and returns the top layer's
    /// final hidden state `(hidden_size, batch)`.
    pub fn forward_sequence(&self, sequence: &[Array2<f64>]) -> Array2<f64> {
        let batch_size = sequence.first().map_or(1, |x| x.ncols());
        let mut hx = self.zero_state(batch_size);
        let mut cx = self.zero_state(batch_size);

        for input in sequence {
            let (new_h, new_c) = self.forward(input, &hx, &cx);
            hx = new_h;
            cx = new_c;
        }

        hx.pop().unwrap_or_else(|| Array2::zeros((self.hidden_size, batch_size)))
    }

    /// Process an entire sequence with caching for training
    ///
    /// Maintains hidden/cell state across time steps within the sequence.
    pub fn forward_sequence_with_cache(&self, sequence: &[Array2<f64>]) -> (Array2<f64>, LSTMSequenceCache) {
        let batch_size = sequence.first().map_or(1, |x| x.ncols());
        let mut hx = self.zero_state(batch_size);
        let mut cx = self.zero_state(batch_size);
        let mut steps = Vec::with_capacity(sequence.len());

        for input in sequence {
            let (new_h, new_c, caches) = self.forward_with_cache(input, &hx, &cx);
            steps.push(caches);
            hx = new_h;
            cx = new_c;
        }

        let last = hx.pop().unwrap_or_else(|| Array2::zeros((self.hidden_size, batch_size)));
        (last, LSTMSequenceCache { steps })
    }

    /// Backpropagation through time for a sequence-to-one objective
    ///
    /// `d_last_hidden` is the loss gradient w.r.t. the top layer's final
    /// hidden state. Gradients are accumulated over all timesteps and
    /// returned per layer in forward order.
    pub fn backward_sequence(&self, d_last_hidden: &Array2<f64>, cache: &LSTMSequenceCache) -> Vec<LSTMCellGradients> {
        let batch_size = d_last_hidden.ncols();
        let mut gradients = self.zero_gradients();
        let mut dh_next = self.zero_state(batch_size);
        let mut dc_next = self.zero_state(batch_size);
        let last_step = cache.steps.len().saturating_sub(1);

        for (t, step_caches) in cache.steps.iter().enumerate().rev() {
            // Only the final timestep receives gradient from the loss
            let mut dh_from_above = if t == last_step {
                d_last_hidden.clone()
            } else {
                Array2::zeros((self.hidden_size, batch_size))
            };

            for (layer, cell) in self.cells.iter().enumerate().rev() {
                let dh = &dh_from_above + &dh_next[layer];
                let (step_gradients, dx, dhx, dcx) = cell.backward(&dh, &dc_next[layer], &step_caches[layer]);
                gradients[layer].accumulate(&step_gradients);

                dh_next[layer] = dhx;
                dc_next[layer] = dcx;
                dh_from_above = dx;
            }
        }

        gradients
    }

    /// Update parameters for all layers using computed gradients
    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &[LSTMCellGradients], optimizer: &mut O) {
        for (i, (cell, cell_gradients)) in self.cells.iter_mut().zip(gradients.iter()).enumerate() {
            let prefix = format!("lstm_layer_{}", i);
            cell.update_parameters(cell_gradients, optimizer, &prefix);
        }
    }

    /// Initialize zero gradients for all layers
    pub fn zero_gradients(&self) -> Vec<LSTMCellGradients> {
        self.cells.iter().map(|cell| cell.zero_gradients()).collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.w_ih.len() + c.w_hh.len() + c.b_ih.len() + c.b_hh.len())
            .sum()
    }
}
