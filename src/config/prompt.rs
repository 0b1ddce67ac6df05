use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use log::{ info, warn };

pub const RAG_ANSWER_TEMPLATE: &str = "rag_answer";

const DEFAULT_RAG_ANSWER: &str = "<|system|>
You are a helpful cooking assistant. Answer questions based on the provided context. Be concise.<|end|>
<|user|>
Context:
{context}

Question: {question}<|end|>
<|assistant|>";

const DEFAULT_NO_RESULTS: &str = "I couldn't find any relevant cooking info in my database.";
const DEFAULT_APOLOGY: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Canned replies shown when no model call produces the answer.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReplyMessages {
    pub no_results: String,
    pub apology: String,
}

impl Default for ReplyMessages {
    fn default() -> Self {
        Self {
            no_results: DEFAULT_NO_RESULTS.to_string(),
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    #[serde(default)]
    pub response_templates: HashMap<String, String>,
    #[serde(default)]
    pub messages: ReplyMessages,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let mut response_templates = HashMap::new();
        response_templates.insert(RAG_ANSWER_TEMPLATE.to_string(), DEFAULT_RAG_ANSWER.to_string());
        Self {
            response_templates,
            messages: ReplyMessages::default(),
            last_loaded: None,
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if !self.response_templates.contains_key(RAG_ANSWER_TEMPLATE) {
            return Err(
                PromptError::TemplateNotFound(format!("response_templates:{}", RAG_ANSWER_TEMPLATE))
            );
        }
        Ok(())
    }
}

pub fn parse_prompts(text: &str) -> Result<PromptConfig, PromptError> {
    let mut config: PromptConfig = serde_json::from_str(text)?;
    // Files may override a subset of templates; the rest fall back to the defaults.
    for (key, value) in PromptConfig::default().response_templates {
        config.response_templates.entry(key).or_insert(value);
    }
    config.validate()?;
    Ok(config)
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    let mut config = parse_prompts(&file_content)
        .map_err(|e| format!("Failed to parse prompts file '{}': {}", path, e))?;
    config.last_loaded = Some(SystemTime::now());
    Ok(Arc::new(config))
}

/// Loads the prompt file when it exists, otherwise the built-in templates.
pub fn load_prompts_or_default(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    if Path::new(path).exists() {
        info!("Loading prompt templates from {}", path);
        load_prompts(path)
    } else {
        warn!("Prompts file '{}' not found, using built-in templates", path);
        Ok(Arc::new(PromptConfig::default()))
    }
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &Arc<PromptConfig>
) -> Result<Option<Arc<PromptConfig>>, PromptError> {
    let path_str = path.as_ref().to_string_lossy().to_string();
    let metadata = fs::metadata(&path)?;

    if let Ok(modified) = metadata.modified() {
        let changed = match current_config.last_loaded {
            Some(last_loaded) => modified > last_loaded,
            None => true,
        };
        if changed {
            info!("Prompts file changed, reloading...");
            let mut config = parse_prompts(&fs::read_to_string(&path_str)?)?;
            config.last_loaded = Some(SystemTime::now());
            return Ok(Some(Arc::new(config)));
        }
    }
    Ok(None)
}

fn get_response_template<'a>(config: &'a PromptConfig, key: &str) -> Result<&'a str, PromptError> {
    config.response_templates
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| PromptError::TemplateNotFound(format!("response_templates:{}", key)))
}

pub fn get_rag_answer_prompt(
    config: &PromptConfig,
    context: &str,
    question: &str
) -> Result<String, PromptError> {
    let template = get_response_template(config, RAG_ANSWER_TEMPLATE)?;
    Ok(render_template(template, &[("context", context), ("question", question)]))
}

/// Fills `{name}` placeholders in one pass, so substituted values are never
/// scanned again. Unknown placeholders are left as written.
fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after
            .find('}')
            .and_then(|close| values.iter().find(|(name, _)| *name == &after[..close]).map(|(_, v)| (close, v)));
        match value {
            Some((close, v)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_prompt_uses_chat_markers() {
        let config = PromptConfig::default();
        let prompt = get_rag_answer_prompt(&config, "Sear over high heat.", "How to sear?").unwrap();
        assert!(prompt.starts_with("<|system|>\nYou are a helpful cooking assistant."));
        assert!(prompt.contains("Context:\nSear over high heat.\n\nQuestion: How to sear?<|end|>"));
        assert!(prompt.ends_with("<|assistant|>"));
    }

    #[test]
    fn placeholders_inside_context_are_not_expanded() {
        let config = parse_prompts(r#"{"response_templates":{"rag_answer":"C: {context} Q: {question} {other}"}}"#).unwrap();
        let prompt = get_rag_answer_prompt(&config, "Write {question} on the card.", "Why rest dough?").unwrap();
        assert_eq!(prompt, "C: Write {question} on the card. Q: Why rest dough? {other}");
    }

    #[test]
    fn partial_file_keeps_default_templates() {
        let config = parse_prompts(r#"{"messages":{"no_results":"Nothing here."}}"#).unwrap();
        assert_eq!(config.messages.no_results, "Nothing here.");
        assert_eq!(config.messages.apology, DEFAULT_APOLOGY);
        assert!(config.response_templates.contains_key(RAG_ANSWER_TEMPLATE));
    }

    #[test]
    fn reload_only_when_file_is_newer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"response_templates":{{"rag_answer":"Q: {{question}}"}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let loaded = load_prompts(&path).unwrap();
        assert_eq!(get_rag_answer_prompt(&loaded, "", "salt?").unwrap(), "Q: salt?");
        assert!(reload_prompts_if_changed(&path, &loaded).unwrap().is_none());

        let never_loaded = Arc::new(PromptConfig::default());
        assert!(reload_prompts_if_changed(&path, &never_loaded).unwrap().is_some());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_prompts_or_default("/nonexistent/prompts.json").unwrap();
        assert_eq!(config.messages.no_results, DEFAULT_NO_RESULTS);
    }
}
