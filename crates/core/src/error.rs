use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("No live attribution for product {product_ref_id} and no click id supplied")]
    MissingAttribution { product_ref_id: String },

    #[error("Corrupt attribution record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
}
