pub mod candle_dgp_inference;
pub mod candle_dgp_model;
pub mod candle_dgp_ops;
pub mod candle_dgp_traits;
pub mod candle_layer_stack;
pub mod candle_minibatch;
pub mod candle_noise;
pub mod candle_tiling;
pub mod cli;
pub mod layers;
pub mod likelihood;
pub mod tensor_io;

pub use candle_core;
pub use candle_nn;
