//! Annotation descriptors to renderer primitives
//!
//! [`translator::AnnotationTranslator`] is a pure translation of one batch;
//! [`layer::AnnotationLayer`] queues the result and hands it to a
//! [`crate::rendering::RenderingEngine`] once that is ready.

pub mod color;
pub mod icon;
pub mod layer;
pub mod primitive;
pub mod translator;
