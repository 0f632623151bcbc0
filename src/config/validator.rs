use crate::config::Settings;
use crate::error::{IndexerError, Result, ValidationError};
use crate::indexing::SUPPORTED_QUANTIZATION_BITS;

/// Settings validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the settings, collecting every failure
    pub fn validate(settings: &Settings) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_run(settings, &mut errors);
        Self::validate_index(settings, &mut errors);
        Self::validate_embedding(settings, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IndexerError::ConfigValidation { errors })
        }
    }

    fn validate_run(settings: &Settings, errors: &mut Vec<ValidationError>) {
        if settings.run.nranks == 0 {
            errors.push(ValidationError::new(
                "run.nranks",
                "Number of ranks must be greater than 0",
            ));
        }
    }

    fn validate_index(settings: &Settings, errors: &mut Vec<ValidationError>) {
        if settings.index.max_passage_length == 0 {
            errors.push(ValidationError::new(
                "index.max_passage_length",
                "Maximum passage length must be greater than 0",
            ));
        }

        let bits = settings.index.quantization_bits;
        if !SUPPORTED_QUANTIZATION_BITS.contains(&bits) {
            errors.push(ValidationError::new(
                "index.quantization_bits",
                format!(
                    "Quantization bits must be one of {:?}, got {}",
                    SUPPORTED_QUANTIZATION_BITS, bits
                ),
            ));
        }

        if settings.index.index_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "index.index_name",
                "Index name cannot be empty",
            ));
        }
    }

    fn validate_embedding(settings: &Settings, errors: &mut Vec<ValidationError>) {
        if settings.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if settings.embedding.window_tokens == 0 {
            errors.push(ValidationError::new(
                "embedding.window_tokens",
                "Window size must be greater than 0",
            ));
        }
    }
}
