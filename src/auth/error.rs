// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use super::types::{AuthMethodType, Locale};
use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication method '{0}' is not in the catalog")]
    MethodNotFound(String),
    #[error("authentication method '{0}' is unavailable")]
    MethodUnavailable(AuthMethodType),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// Control-flow signal: a code was dispatched and must be submitted
    #[error("verification required: code sent to {contact} via {method}")]
    VerificationRequired { method: AuthMethodType, contact: String },
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("backup credential storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("priority {priority} is already held by '{holder}'")]
    DuplicatePriority { priority: i32, holder: AuthMethodType },
}

/// Stable failure category carried in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    MethodNotFound,
    MethodUnavailable,
    MissingCredential,
    InvalidCredential,
    VerificationRequired,
    Transport,
    Storage,
    Configuration,
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::MethodNotFound(_) => AuthErrorKind::MethodNotFound,
            Self::MethodUnavailable(_) => AuthErrorKind::MethodUnavailable,
            Self::MissingCredential(_) => AuthErrorKind::MissingCredential,
            Self::InvalidCredential(_) => AuthErrorKind::InvalidCredential,
            Self::VerificationRequired { .. } => AuthErrorKind::VerificationRequired,
            Self::Transport(_) => AuthErrorKind::Transport,
            Self::Storage(_) => AuthErrorKind::Storage,
            Self::DuplicatePriority { .. } => AuthErrorKind::Configuration,
        }
    }
}

impl AuthErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodNotFound => "method_not_found",
            Self::MethodUnavailable => "method_unavailable",
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::VerificationRequired => "verification_required",
            Self::Transport => "transport",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
        }
    }

    /// User-facing message in `locale`.
    #[must_use]
    pub fn message(&self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::En, Self::MethodNotFound) => "This sign-in method is not supported.",
            (Locale::En, Self::MethodUnavailable) => "This sign-in method is temporarily unavailable. Try another one.",
            (Locale::En, Self::MissingCredential) => "Please enter your sign-in details.",
            (Locale::En, Self::InvalidCredential) => "The credentials or code you entered are not valid.",
            (Locale::En, Self::VerificationRequired) => "We sent you a verification code.",
            (Locale::En, Self::Transport) => "We could not reach the server. Check your connection and try again.",
            (Locale::En, Self::Storage) => "Your session could not be saved on this device.",
            (Locale::En, Self::Configuration) => "Sign-in is misconfigured. Please contact support.",
            (Locale::Es, Self::MethodNotFound) => "Este método de acceso no está soportado.",
            (Locale::Es, Self::MethodUnavailable) => "Este método de acceso no está disponible por ahora. Prueba con otro.",
            (Locale::Es, Self::MissingCredential) => "Ingresa tus datos de acceso.",
            (Locale::Es, Self::InvalidCredential) => "Las credenciales o el código no son válidos.",
            (Locale::Es, Self::VerificationRequired) => "Te enviamos un código de verificación.",
            (Locale::Es, Self::Transport) => "No pudimos conectar con el servidor. Revisa tu conexión e inténtalo de nuevo.",
            (Locale::Es, Self::Storage) => "No pudimos guardar tu sesión en este dispositivo.",
            (Locale::Es, Self::Configuration) => "El acceso está mal configurado. Contacta a soporte.",
        }
    }
}
