//! Weight I/O
//!
//! Parameter states are exchanged as SafeTensors or JSON. Both carry the
//! parameter names and shapes needed for partial loading.

mod format;
mod load;
mod save;
mod state;


pub use format::WeightFormat;
pub use load::load_weights;
pub use save::save_weights;
pub use state::{ParamState, ParameterInfo};
