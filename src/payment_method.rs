//! Payout destinations per provider.
//!
//! Each provider's list is guarded by its map entry, so clearing the old
//! default and setting the new one happen under one lock.

use dashmap::DashMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::model::{MethodId, MethodKind, PaymentMethod, ProviderId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MethodError {
    #[error("payment method {0} is unknown or not owned by this provider")]
    UnknownOrUnowned(MethodId),

    #[error("account identifier must contain at least 4 alphanumeric characters")]
    InvalidIdentifier,
}

/// Keep the last four alphanumeric characters visible.
pub fn mask_identifier(raw: &str) -> Option<String> {
    let chars: Vec<char> = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if chars.len() < 4 {
        return None;
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    Some(format!("{}{tail}", "*".repeat(chars.len() - 4)))
}

#[derive(Debug, Default)]
pub struct PaymentMethods {
    by_provider: DashMap<ProviderId, Vec<PaymentMethod>>,
}

impl PaymentMethods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination. The raw identifier is masked and dropped.
    ///
    /// A provider's first method becomes the default.
    pub fn register(
        &self,
        provider: &str,
        kind: MethodKind,
        holder: &str,
        identifier: &str,
        make_default: bool,
    ) -> Result<PaymentMethod, MethodError> {
        let masked_identifier = mask_identifier(identifier).ok_or(MethodError::InvalidIdentifier)?;

        let mut methods = self.by_provider.entry(provider.to_string()).or_default();
        let is_default = make_default || methods.is_empty();
        if is_default {
            for m in methods.iter_mut() {
                m.is_default = false;
            }
        }

        let method = PaymentMethod {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            kind,
            holder: holder.to_string(),
            masked_identifier,
            is_default,
        };
        methods.push(method.clone());

        info!(provider, method = %method.id, default = is_default, "payment method registered");
        Ok(method)
    }

    pub fn set_default(&self, provider: &str, method: MethodId) -> Result<(), MethodError> {
        let mut methods = self
            .by_provider
            .get_mut(provider)
            .ok_or(MethodError::UnknownOrUnowned(method))?;

        if !methods.iter().any(|m| m.id == method) {
            return Err(MethodError::UnknownOrUnowned(method));
        }
        for m in methods.iter_mut() {
            m.is_default = m.id == method;
        }
        Ok(())
    }

    /// Remove a method; if it was the default the oldest remaining one takes over.
    pub fn remove(&self, provider: &str, method: MethodId) -> Result<PaymentMethod, MethodError> {
        let mut methods = self
            .by_provider
            .get_mut(provider)
            .ok_or(MethodError::UnknownOrUnowned(method))?;

        let idx = methods
            .iter()
            .position(|m| m.id == method)
            .ok_or(MethodError::UnknownOrUnowned(method))?;
        let removed = methods.remove(idx);

        if removed.is_default {
            if let Some(first) = methods.first_mut() {
                first.is_default = true;
            }
        }
        Ok(removed)
    }

    pub fn list(&self, provider: &str) -> Vec<PaymentMethod> {
        self.by_provider
            .get(provider)
            .map(|methods| methods.clone())
            .unwrap_or_default()
    }

    pub fn default_for(&self, provider: &str) -> Option<PaymentMethod> {
        self.by_provider
            .get(provider)?
            .iter()
            .find(|m| m.is_default)
            .cloned()
    }

    /// Look up `method` among `provider`'s own methods only.
    pub fn resolve(&self, provider: &str, method: MethodId) -> Result<PaymentMethod, MethodError> {
        self.by_provider
            .get(provider)
            .and_then(|methods| methods.iter().find(|m| m.id == method).cloned())
            .ok_or(MethodError::UnknownOrUnowned(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(registry: &PaymentMethods, provider: &str) -> usize {
        registry
            .list(provider)
            .iter()
            .filter(|m| m.is_default)
            .count()
    }

    #[test]
    fn mask_keeps_last_four() {
        assert_eq!(mask_identifier("0123456789").unwrap(), "******6789");
        assert_eq!(mask_identifier("01-23 45").unwrap(), "**2345");
        assert_eq!(mask_identifier("12a"), None);
    }

    #[test]
    fn first_method_becomes_default() {
        let registry = PaymentMethods::new();
        let m = registry
            .register("p1", MethodKind::BankAccount, "Jane", "0012345678", false)
            .unwrap();
        assert!(m.is_default);
        assert_eq!(m.masked_identifier, "******5678");
    }

    #[test]
    fn new_default_clears_previous() {
        let registry = PaymentMethods::new();
        let first = registry
            .register("p1", MethodKind::BankAccount, "Jane", "0012345678", false)
            .unwrap();
        let second = registry
            .register("p1", MethodKind::MobileWalletA, "Jane", "01000000001", true)
            .unwrap();

        assert_eq!(defaults(&registry, "p1"), 1);
        assert_eq!(registry.default_for("p1").unwrap().id, second.id);

        registry.set_default("p1", first.id).unwrap();
        assert_eq!(defaults(&registry, "p1"), 1);
        assert_eq!(registry.default_for("p1").unwrap().id, first.id);
    }

    #[test]
    fn set_default_rejects_foreign_method() {
        let registry = PaymentMethods::new();
        let theirs = registry
            .register("p2", MethodKind::BankAccount, "Sam", "99998888", false)
            .unwrap();
        registry
            .register("p1", MethodKind::BankAccount, "Jane", "0012345678", false)
            .unwrap();

        assert_eq!(
            registry.set_default("p1", theirs.id),
            Err(MethodError::UnknownOrUnowned(theirs.id))
        );
        assert_eq!(registry.default_for("p2").unwrap().id, theirs.id);
    }

    #[test]
    fn resolve_only_finds_own_methods() {
        let registry = PaymentMethods::new();
        let theirs = registry
            .register("p2", MethodKind::MobileWalletB, "Sam", "01111111111", false)
            .unwrap();

        assert!(registry.resolve("p2", theirs.id).is_ok());
        assert_eq!(
            registry.resolve("p1", theirs.id),
            Err(MethodError::UnknownOrUnowned(theirs.id))
        );
    }

    #[test]
    fn removing_default_promotes_oldest() {
        let registry = PaymentMethods::new();
        let a = registry
            .register("p1", MethodKind::BankAccount, "Jane", "11112222", false)
            .unwrap();
        let b = registry
            .register("p1", MethodKind::BankAccount, "Jane", "33334444", false)
            .unwrap();
        let c = registry
            .register("p1", MethodKind::BankAccount, "Jane", "55556666", true)
            .unwrap();

        registry.remove("p1", c.id).unwrap();
        assert_eq!(registry.default_for("p1").unwrap().id, a.id);
        assert_eq!(registry.list("p1").len(), 2);
        assert!(!registry.resolve("p1", b.id).unwrap().is_default);
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let registry = PaymentMethods::new();
        assert_eq!(
            registry.register("p1", MethodKind::BankAccount, "Jane", "12", false),
            Err(MethodError::InvalidIdentifier)
        );
        assert!(registry.list("p1").is_empty());
    }
}
