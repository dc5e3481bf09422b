/// Module for LSTM network models.
pub mod lstm_network;

/// LSTM stack with a dense regression head.
pub mod regressor;
