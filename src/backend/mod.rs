pub mod gles;
pub mod kms;
