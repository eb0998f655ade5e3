//! Provider abstraction and its explicit configuration
//!
//! `CredentialProvider` decouples the credential manager from how tickets are
//! actually obtained. Uses `Pin<Box<dyn Future>>` return types so providers can
//! be shared as `Arc<dyn CredentialProvider>`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use common::Secret;

use crate::credential::Credential;
use crate::error::Result;

/// Performs the acquisition/renewal protocol exchange.
pub trait CredentialProvider: Send + Sync {
    /// Identifier for logging (e.g. "kinit")
    fn id(&self) -> &str;

    /// Full login: obtain a brand-new credential.
    fn acquire(&self) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + '_>>;

    /// Extend the lifetime of `current` without a full login.
    ///
    /// Returns a new `Credential`; `current` is left untouched.
    fn renew<'a>(
        &'a self,
        current: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + 'a>>;

    /// Release the credential with the authentication service / local cache.
    fn logout<'a>(
        &'a self,
        current: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Overwrite any secret material (passwords, cached keys) held in memory.
    /// After this call `acquire()` may fail.
    fn wipe_secrets(&self);
}

/// Paths of the Kerberos command line tools.
#[derive(Debug, Clone)]
pub struct KerberosTools {
    pub kinit: PathBuf,
    pub klist: PathBuf,
    pub kdestroy: PathBuf,
}

impl Default for KerberosTools {
    fn default() -> Self {
        Self {
            kinit: PathBuf::from("kinit"),
            klist: PathBuf::from("klist"),
            kdestroy: PathBuf::from("kdestroy"),
        }
    }
}

/// Explicit provider configuration.
///
/// Everything a provider needs to talk to the KDC is carried here rather than
/// in process-wide properties, so two providers with different realms can
/// coexist in one process.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub principal: String,
    pub realm: Option<String>,
    pub kdc: Option<String>,
    /// Existing krb5.conf; takes precedence over `realm`/`kdc` rendering.
    pub krb5_conf: Option<PathBuf>,
    pub keytab: Option<PathBuf>,
    pub password: Option<Secret<String>>,
    /// Directory for the private credential cache and rendered krb5.conf.
    pub cache_dir: PathBuf,
    pub tools: KerberosTools,
}

impl ProviderSettings {
    pub fn new(principal: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            principal: principal.into(),
            realm: None,
            kdc: None,
            krb5_conf: None,
            keytab: None,
            password: None,
            cache_dir: cache_dir.into(),
            tools: KerberosTools::default(),
        }
    }

    /// Principal qualified with the realm when it has none of its own.
    pub fn qualified_principal(&self) -> String {
        match &self.realm {
            Some(realm) if !self.principal.contains('@') => format!("{}@{realm}", self.principal),
            _ => self.principal.clone(),
        }
    }

    /// Private file cache name, e.g. `FILE:/var/lib/tk/krb5cc_svc_EXAMPLE.COM`.
    pub fn cache_name(&self) -> String {
        let sanitized: String = self
            .qualified_principal()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        format!(
            "FILE:{}",
            self.cache_dir.join(format!("krb5cc_{sanitized}")).display()
        )
    }

    /// Minimal krb5.conf for the configured realm and KDC.
    ///
    /// Returns `None` when either is missing; the system configuration is then
    /// used as-is.
    pub fn render_krb5_conf(&self) -> Option<String> {
        let realm = self.realm.as_deref()?;
        let kdc = self.kdc.as_deref()?;
        Some(format!(
            "[libdefaults]\n    default_realm = {realm}\n    renewable = true\n\n\
             [realms]\n    {realm} = {{\n        kdc = {kdc}\n    }}\n"
        ))
    }
}
