use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub text: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".into()
}
