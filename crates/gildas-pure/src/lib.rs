//! Pure Rust reader and writer for GILDAS data: CLASS multi-spectrum
//! containers and LMV spectral-line cubes, plus automated Gaussian line
//! fitting.
//!
//! Everything is synchronous and single-threaded. Container and cube handles
//! read with explicit seeks and must not be shared between threads without
//! external locking.

extern crate alloc;

pub mod block;
pub mod catalog;
pub mod codec;
pub mod container;
pub mod cube;
pub mod cube_header;
pub mod entry;
pub mod error;
pub mod gaussfit;
pub mod interchange;
pub mod kernel;
pub mod line;
pub mod noise;
pub mod parameter;
pub mod projection;
pub mod reduce;
pub mod reproject;
pub mod section;
pub mod spectrum;
pub mod spline;
pub mod writer;

pub use block::{BLOCK_SIZE, CUBE_HEADER_SIZE, PREAMBLE_SIZE};
pub use codec::{Codec, Encoding, GildasDate};
pub use container::SpectrumContainer;
pub use cube::CubeRecord;
pub use error::{Error, Result};
pub use line::SpectrumLine;
pub use reduce::{LineFittingEngine, ReduceConfig, Reduction};
pub use spectrum::{SpectralAxis, SpectrumRecord};
pub use writer::ContainerWriter;
