//! Configuration management for the voice calling service

use std::path::PathBuf;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default Vapi REST root
pub const DEFAULT_VAPI_BASE_URL: &str = "https://api.vapi.ai";

/// Default port for the webhook relay
pub const DEFAULT_WEBHOOK_PORT: u16 = 3000;

/// Voice calling configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Vapi API configuration
    pub vapi: VapiConfig,

    /// Webhook relay configuration
    pub webhook: WebhookConfig,

    /// Directory holding `<template>.json` call scripts
    pub templates_dir: PathBuf,
}

/// Vapi API configuration
#[derive(Debug, Clone)]
pub struct VapiConfig {
    /// Bearer token (from `VAPI_API_KEY` env)
    pub api_key: Option<SecretString>,

    /// Outbound phone number ID registered with Vapi
    pub phone_number_id: Option<String>,

    /// REST root, overridable for testing
    pub base_url: String,
}

/// Webhook relay configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Port to listen on
    pub port: u16,

    /// Public URL Vapi delivers events to
    pub public_url: Option<String>,

    /// Shared HMAC secret; signature checks are skipped when unset
    pub secret: Option<SecretString>,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("WEBHOOK_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid WEBHOOK_PORT {raw:?}: {e}")))?,
            None => DEFAULT_WEBHOOK_PORT,
        };

        let vapi = VapiConfig {
            api_key: non_empty("VAPI_API_KEY").map(SecretString::from),
            phone_number_id: non_empty("VAPI_PHONE_NUMBER_ID"),
            base_url: non_empty("VAPI_BASE_URL")
                .map_or_else(|| DEFAULT_VAPI_BASE_URL.to_string(), |u| {
                    u.trim_end_matches('/').to_string()
                }),
        };

        let webhook = WebhookConfig {
            port,
            public_url: non_empty("WEBHOOK_URL"),
            secret: non_empty("WEBHOOK_SECRET").map(SecretString::from),
        };

        let templates_dir = non_empty("VOICE_TEMPLATES_DIR")
            .map_or_else(|| PathBuf::from("templates"), PathBuf::from);

        Ok(Self {
            vapi,
            webhook,
            templates_dir,
        })
    }

    /// Whether the webhook relay should be started
    ///
    /// A public URL that does not point at localhost means Vapi can reach us
    #[must_use]
    pub fn server_mode(&self) -> bool {
        self.webhook
            .public_url
            .as_deref()
            .is_some_and(|url| !url.contains("localhost"))
    }
}
