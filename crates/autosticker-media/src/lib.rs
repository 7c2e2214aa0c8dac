//! # autosticker-media
//!
//! Local media handling for the responder: enumerating candidate images in
//! a directory and turning a JPEG source into a WebP sticker payload.

pub mod catalog;
pub mod transform;

pub use catalog::{MediaAsset, MediaCatalog};
pub use transform::{DecodedImage, EncodedMedia, MediaTransform};
