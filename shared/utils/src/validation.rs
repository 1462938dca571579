use crate::error::{ProcuraError, ProcuraResult};
use validator::{Validate, ValidationErrors};

pub fn validate_model<T: Validate>(model: &T) -> ProcuraResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let error_messages = format_validation_errors(&errors);
            Err(ProcuraError::validation("model", error_messages))
        }
    }
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match &error.message {
                Some(message) => message.to_string(),
                None => match error.code.as_ref() {
                    "length" => format!("Length validation failed for field '{}'", field),
                    "range" => format!("Value out of range for field '{}'", field),
                    "required" => format!("Field '{}' is required", field),
                    code => format!("Validation failed for field '{}': {}", field, code),
                },
            };
            messages.push(message);
        }
    }

    messages.sort();
    messages.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_models::Supplier;

    #[test]
    fn test_validate_model_reports_message() {
        let supplier = Supplier::new(1, "");
        let err = validate_model(&supplier).unwrap_err();
        assert_eq!(
            err,
            ProcuraError::validation("model", "Supplier name must be between 1 and 255 characters")
        );
    }
}
