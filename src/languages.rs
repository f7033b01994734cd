//! Supported runtime families and web frameworks.
//!
//! Language and framework strings arrive free-form from callers; they are
//! parsed here once and only the typed values travel further.

pub mod commands;
pub mod detect;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Node,
}

impl Language {
    /// Parses a language name or alias, ignoring case.
    pub fn parse(name: &str) -> Option<Language> {
        match name.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "node" | "node.js" | "nodejs" | "javascript" | "js" | "typescript" | "ts" => {
                Some(Language::Node)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    FastApi,
    Flask,
    Django,
    Streamlit,
    Gradio,
    Express,
    NextJs,
    React,
    Vue,
    Angular,
}

impl Framework {
    pub const ALL: [Framework; 10] = [
        Framework::FastApi,
        Framework::Flask,
        Framework::Django,
        Framework::Streamlit,
        Framework::Gradio,
        Framework::Express,
        Framework::NextJs,
        Framework::React,
        Framework::Vue,
        Framework::Angular,
    ];

    pub fn parse(name: &str) -> Option<Framework> {
        match name.trim().to_lowercase().as_str() {
            "fastapi" => Some(Framework::FastApi),
            "flask" => Some(Framework::Flask),
            "django" => Some(Framework::Django),
            "streamlit" => Some(Framework::Streamlit),
            "gradio" => Some(Framework::Gradio),
            "express" => Some(Framework::Express),
            "next" | "next.js" | "nextjs" => Some(Framework::NextJs),
            "react" => Some(Framework::React),
            "vue" => Some(Framework::Vue),
            "angular" => Some(Framework::Angular),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::FastApi => "fastapi",
            Framework::Flask => "flask",
            Framework::Django => "django",
            Framework::Streamlit => "streamlit",
            Framework::Gradio => "gradio",
            Framework::Express => "express",
            Framework::NextJs => "next",
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Angular => "angular",
        }
    }

    pub fn language(&self) -> Language {
        match self {
            Framework::FastApi
            | Framework::Flask
            | Framework::Django
            | Framework::Streamlit
            | Framework::Gradio => Language::Python,
            Framework::Express
            | Framework::NextJs
            | Framework::React
            | Framework::Vue
            | Framework::Angular => Language::Node,
        }
    }

    /// Port the application listens on inside its container.
    pub fn internal_port(&self) -> u16 {
        match self {
            Framework::FastApi | Framework::Django => 8000,
            Framework::Flask => 5000,
            Framework::Streamlit => 8501,
            Framework::Gradio => 7860,
            Framework::Express | Framework::NextJs | Framework::React => 3000,
            Framework::Vue => 8080,
            Framework::Angular => 4200,
        }
    }

    /// Environment that makes dev servers bind to all interfaces and stay quiet.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("HOST".to_string(), "0.0.0.0".to_string()),
            ("PORT".to_string(), self.internal_port().to_string()),
        ];
        let extra: &[(&str, &str)] = match self {
            Framework::React | Framework::NextJs => &[
                ("BROWSER", "none"),
                ("CI", "true"),
                ("CHOKIDAR_USEPOLLING", "true"),
                ("WATCHPACK_POLLING", "true"),
            ],
            Framework::Vue | Framework::Angular => &[
                ("BROWSER", "none"),
                ("CI", "true"),
                ("CHOKIDAR_USEPOLLING", "true"),
            ],
            _ => &[],
        };
        env.extend(
            extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        env
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
