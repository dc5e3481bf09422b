/// Recurrent cell used by the sequence models.
pub mod lstm_cell;

/// Dense layer used by the regression head.
pub mod linear;
