//! Saved model files: weights, fitted scaler and run metadata.
//!
//! `.json` paths are written as pretty JSON, anything else as bincode.
//! Training checkpoints go through the same format.

use ndarray::{Array2, Dimension};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub use crate::error::PersistenceError;
use crate::layers::linear::LinearLayer;
use crate::layers::lstm_cell::LSTMCell;
use crate::models::lstm_network::LSTMNetwork;
use crate::models::regressor::SequenceRegressor;
use crate::scaler::MinMaxScaler;
use crate::training::{CheckpointSink, TrainingMetrics};

/// Serializable version of Array2<f64> for persistence
#[derive(Serialize, Deserialize)]
struct SerializableArray2 {
    data: Vec<f64>,
    shape: (usize, usize),
}

impl From<&Array2<f64>> for SerializableArray2 {
    fn from(array: &Array2<f64>) -> Self {
        Self {
            data: array.iter().cloned().collect(),
            shape: array.raw_dim().into_pattern(),
        }
    }
}

impl TryFrom<SerializableArray2> for Array2<f64> {
    type Error = PersistenceError;

    fn try_from(value: SerializableArray2) -> Result<Self, Self::Error> {
        Array2::from_shape_vec(value.shape, value.data)
            .map_err(|e| PersistenceError::InvalidCheckpoint(e.to_string()))
    }
}

/// Serializable LSTM cell parameters
#[derive(Serialize, Deserialize)]
pub struct SerializableLSTMCell {
    w_ih: SerializableArray2,
    w_hh: SerializableArray2,
    b_ih: SerializableArray2,
    b_hh: SerializableArray2,
    hidden_size: usize,
}

impl From<&LSTMCell> for SerializableLSTMCell {
    fn from(cell: &LSTMCell) -> Self {
        Self {
            w_ih: (&cell.w_ih).into(),
            w_hh: (&cell.w_hh).into(),
            b_ih: (&cell.b_ih).into(),
            b_hh: (&cell.b_hh).into(),
            hidden_size: cell.hidden_size,
        }
    }
}

impl TryFrom<SerializableLSTMCell> for LSTMCell {
    type Error = PersistenceError;

    fn try_from(cell: SerializableLSTMCell) -> Result<Self, Self::Error> {
        let restored = LSTMCell {
            w_ih: cell.w_ih.try_into()?,
            w_hh: cell.w_hh.try_into()?,
            b_ih: cell.b_ih.try_into()?,
            b_hh: cell.b_hh.try_into()?,
            hidden_size: cell.hidden_size,
        };

        let gates = 4 * restored.hidden_size;
        if restored.w_ih.nrows() != gates
            || restored.w_hh.dim() != (gates, restored.hidden_size)
            || restored.b_ih.dim() != (gates, 1)
            || restored.b_hh.dim() != (gates, 1)
        {
            return Err(PersistenceError::InvalidCheckpoint(
                "LSTM cell parameter shapes do not match hidden size".to_string(),
            ));
        }
        Ok(restored)
    }
}

/// Serializable dense layer parameters
#[derive(Serialize, Deserialize)]
pub struct SerializableLinear {
    weight: SerializableArray2,
    bias: SerializableArray2,
}

impl From<&LinearLayer> for SerializableLinear {
    fn from(layer: &LinearLayer) -> Self {
        Self {
            weight: (&layer.weight).into(),
            bias: (&layer.bias).into(),
        }
    }
}

impl TryFrom<SerializableLinear> for LinearLayer {
    type Error = PersistenceError;

    fn try_from(layer: SerializableLinear) -> Result<Self, Self::Error> {
        let weight: Array2<f64> = layer.weight.try_into()?;
        let bias: Array2<f64> = layer.bias.try_into()?;
        if bias.dim() != (weight.nrows(), 1) {
            return Err(PersistenceError::InvalidCheckpoint(
                "dense bias shape does not match weight".to_string(),
            ));
        }
        Ok(LinearLayer::from_weights(weight, bias))
    }
}

/// Serializable LSTM regressor
#[derive(Serialize, Deserialize)]
pub struct SerializableRegressor {
    cells: Vec<SerializableLSTMCell>,
    input_size: usize,
    hidden_size: usize,
    dense: SerializableLinear,
    head: SerializableLinear,
}

impl From<&SequenceRegressor> for SerializableRegressor {
    fn from(model: &SequenceRegressor) -> Self {
        Self {
            cells: model.lstm.get_cells().iter().map(|cell| cell.into()).collect(),
            input_size: model.lstm.input_size,
            hidden_size: model.lstm.hidden_size,
            dense: (&model.dense).into(),
            head: (&model.head).into(),
        }
    }
}

impl TryFrom<SerializableRegressor> for SequenceRegressor {
    type Error = PersistenceError;

    fn try_from(model: SerializableRegressor) -> Result<Self, Self::Error> {
        let cells = model
            .cells
            .into_iter()
            .map(LSTMCell::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let lstm = LSTMNetwork::from_cells(cells, model.input_size, model.hidden_size);
        Ok(SequenceRegressor::from_parts(lstm, model.dense.try_into()?, model.head.try_into()?))
    }
}

/// Model metadata for tracking training information
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelMetadata {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub lookback: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub dense_size: usize,
    pub total_epochs: usize,
    pub final_loss: Option<f64>,
    pub description: Option<String>,
}

/// Complete saved model: weights, the scaler fitted on the training
/// history, and metadata
#[derive(Serialize, Deserialize)]
pub struct SavedModel {
    pub network: SerializableRegressor,
    pub scaler: MinMaxScaler,
    pub metadata: ModelMetadata,
}

impl SavedModel {
    /// Rebuilds the regressor and returns it with its scaler and metadata
    pub fn restore(self) -> Result<(SequenceRegressor, MinMaxScaler, ModelMetadata), PersistenceError> {
        let model = SequenceRegressor::try_from(self.network)?;
        Ok((model, self.scaler, self.metadata))
    }
}

/// Model persistence operations
pub struct ModelPersistence;

impl ModelPersistence {
    /// Save model to JSON format (human-readable)
    pub fn save_to_json<P: AsRef<Path>>(
        model: &SavedModel,
        path: P,
    ) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(model)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load model from JSON format
    pub fn load_from_json<P: AsRef<Path>>(
        path: P,
    ) -> Result<SavedModel, PersistenceError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let model = serde_json::from_str(&contents)?;
        Ok(model)
    }

    /// Save model to binary format (compact and fast)
    pub fn save_to_binary<P: AsRef<Path>>(
        model: &SavedModel,
        path: P,
    ) -> Result<(), PersistenceError> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, model)?;
        writer.flush()?;
        Ok(())
    }

    /// Load model from binary format
    pub fn load_from_binary<P: AsRef<Path>>(
        path: P,
    ) -> Result<SavedModel, PersistenceError> {
        let reader = BufReader::new(File::open(path)?);
        let model = bincode::deserialize_from(reader)?;
        Ok(model)
    }

    /// Save model to file (format determined by file extension)
    pub fn save<P: AsRef<Path>>(model: &SavedModel, path: P) -> Result<(), PersistenceError> {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => Self::save_to_json(model, path),
            _ => Self::save_to_binary(model, path), // Default to binary
        }
    }

    /// Load model from file (format determined by file extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SavedModel, PersistenceError> {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => Self::load_from_json(path),
            _ => Self::load_from_binary(path),
        }
    }

    /// Create a model with metadata
    pub fn create_saved_model(
        model: &SequenceRegressor,
        scaler: &MinMaxScaler,
        lookback: usize,
        model_name: String,
        total_epochs: usize,
        final_loss: Option<f64>,
        description: Option<String>,
    ) -> SavedModel {
        let metadata = ModelMetadata {
            model_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            lookback,
            hidden_size: model.lstm.hidden_size,
            num_layers: model.lstm.num_layers,
            dense_size: model.dense.output_size,
            total_epochs,
            final_loss,
            description,
        };

        SavedModel {
            network: model.into(),
            scaler: *scaler,
            metadata,
        }
    }
}

/// Writes the model with its scaler to a fixed path whenever training
/// reports a new best epoch
pub struct BestCheckpoint<'a> {
    path: PathBuf,
    scaler: &'a MinMaxScaler,
    lookback: usize,
    model_name: String,
    saves: usize,
}

impl<'a> BestCheckpoint<'a> {
    pub fn new(path: impl Into<PathBuf>, scaler: &'a MinMaxScaler, lookback: usize, model_name: impl Into<String>) -> Self {
        BestCheckpoint {
            path: path.into(),
            scaler,
            lookback,
            model_name: model_name.into(),
            saves: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the checkpoint was rewritten
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl CheckpointSink for BestCheckpoint<'_> {
    fn save_best(&mut self, model: &SequenceRegressor, metrics: &TrainingMetrics) -> Result<(), PersistenceError> {
        let saved = ModelPersistence::create_saved_model(
            model,
            self.scaler,
            self.lookback,
            self.model_name.clone(),
            metrics.epoch + 1,
            Some(metrics.monitored_loss()),
            Some(format!("best checkpoint at epoch {}", metrics.epoch)),
        );
        ModelPersistence::save(&saved, &self.path)?;
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_mismatch_is_rejected() {
        let bad = SerializableArray2 { data: vec![1.0, 2.0, 3.0], shape: (2, 2) };
        let result: Result<Array2<f64>, _> = bad.try_into();
        assert!(matches!(result, Err(PersistenceError::InvalidCheckpoint(_))));
    }

    #[test]
    fn test_cell_shape_validation() {
        let cell = LSTMCell::new(1, 3);
        let mut serialized = SerializableLSTMCell::from(&cell);
        serialized.hidden_size = 4;
        assert!(LSTMCell::try_from(serialized).is_err());
    }
}
