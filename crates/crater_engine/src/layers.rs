//! Layers Module - building blocks of the crater denoiser
//!
//! - TimestepEmbedding: sinusoidal features + MLP
//! - ConditionEmbedding: timestep, body id and radius fused into one vector
//! - ResidualBlock: GroupNorm/SiLU/Conv block with conditioning injection

pub mod conditioning;
pub mod residual;
pub mod timestep;

pub use conditioning::ConditionEmbedding;
pub use residual::ResidualBlock;
pub use timestep::{sinusoidal_embedding, TimestepEmbedding};
