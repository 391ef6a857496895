//! Model backends implementing [`crate::traits::NoteModel`].

pub mod onnx;

pub use onnx::{OnnxNames, OnnxNoteModel};
