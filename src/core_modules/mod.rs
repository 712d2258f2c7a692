pub mod channel_means;
pub mod classifier;
pub mod feature_engineer;
pub mod metadata;
pub mod photometry;
pub mod predictor;

pub mod utils {
    pub mod image_helper;
}
