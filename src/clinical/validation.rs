use crate::config::ClinicalConfig;

/// Cheap screen that keeps obviously unrelated or oversized text away from the
/// generative service.
#[derive(Debug, Clone)]
pub struct MedicalInputValidator {
    keywords: Vec<String>,
    max_chars: usize,
}

impl MedicalInputValidator {
    pub fn new<I, S>(keywords: I, max_chars: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
            max_chars,
        }
    }

    pub fn from_config(config: &ClinicalConfig) -> Self {
        Self::new(&config.keywords, config.max_input_chars)
    }

    /// Accept text that mentions at least one keyword and is shorter than the limit.
    pub fn is_valid(&self, text: &str) -> bool {
        if text.chars().count() >= self.max_chars {
            return false;
        }

        let lowered = text.to_lowercase();
        self.keywords.iter().any(|keyword| lowered.contains(keyword.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn validator() -> MedicalInputValidator {
        MedicalInputValidator::from_config(&AppConfig::default().clinical)
    }

    #[test]
    fn test_accepts_text_with_keyword_in_any_case() {
        assert!(validator().is_valid("The PATIENT reports a mild headache"));
        assert!(validator().is_valid("checked blood pressure twice"));
    }

    #[test]
    fn test_rejects_text_without_keywords() {
        assert!(!validator().is_valid("let's talk about the weather"));
        assert!(!validator().is_valid(""));
    }

    #[test]
    fn test_rejects_text_at_length_limit() {
        let validator = MedicalInputValidator::new(["doctor"], 20);
        assert!(validator.is_valid("doctor visit"));
        assert!(!validator.is_valid(&format!("doctor{}", "x".repeat(14))));
    }
}
