//! Reference provider backed by the system Kerberos tools
//!
//! Runs `kinit`, `klist` and `kdestroy` against a private file credential
//! cache. Configuration reaches the tools through per-command `KRB5CCNAME`
//! and `KRB5_CONFIG` environment variables, never through process-wide state.
//!
//! - acquire: `kinit -k -t <keytab> <principal>`, or `kinit <principal>` with
//!   the password on stdin
//! - renew: `kinit -R`
//! - logout: `kdestroy`
//!
//! After every `kinit` the cache is listed with `klist -f` to learn the
//! ticket's actual expiry and renewability.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::sync::{Mutex, PoisonError};

use common::Secret;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::klist;
use crate::provider::{CredentialProvider, ProviderSettings};

/// `CredentialProvider` that shells out to MIT/Heimdal Kerberos tools.
pub struct KinitProvider {
    settings: ProviderSettings,
    /// Password for non-keytab logins; taken and zeroized by `wipe_secrets`.
    password: Mutex<Option<Secret<String>>>,
    krb5_conf: Option<PathBuf>,
    cache_name: String,
}

impl KinitProvider {
    /// Build the provider, creating the cache directory and rendering a
    /// private krb5.conf when realm and KDC are configured.
    pub fn new(mut settings: ProviderSettings) -> Result<Self> {
        if settings.principal.trim().is_empty() {
            return Err(Error::Settings("principal must not be empty".into()));
        }
        let password = settings.password.take();
        if password.is_none() && settings.keytab.is_none() {
            return Err(Error::Settings(
                "either a password or a keytab is required".into(),
            ));
        }

        std::fs::create_dir_all(&settings.cache_dir).map_err(|e| {
            Error::Io(format!(
                "creating cache dir {}: {e}",
                settings.cache_dir.display()
            ))
        })?;

        let krb5_conf = match (&settings.krb5_conf, settings.render_krb5_conf()) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(contents)) => {
                let path = settings.cache_dir.join("krb5.conf");
                std::fs::write(&path, contents)
                    .map_err(|e| Error::Io(format!("writing {}: {e}", path.display())))?;
                debug!(path = %path.display(), "rendered krb5.conf");
                Some(path)
            }
            (None, None) => None,
        };

        let cache_name = settings.cache_name();
        info!(
            principal = %settings.qualified_principal(),
            cache = %cache_name,
            keytab = settings.keytab.is_some(),
            "kinit provider configured"
        );

        Ok(Self {
            settings,
            password: Mutex::new(password),
            krb5_conf,
            cache_name,
        })
    }

    /// The private credential cache this provider writes to.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn krb5_conf(&self) -> Option<&Path> {
        self.krb5_conf.as_deref()
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("KRB5CCNAME", &self.cache_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(conf) = &self.krb5_conf {
            cmd.env("KRB5_CONFIG", conf);
        }
        cmd
    }

    async fn run(&self, mut cmd: Command, stdin: Option<Secret<String>>) -> Result<Output> {
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Io(format!("failed to spawn kerberos tool: {e}")))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.expose().as_bytes())
                    .await
                    .map_err(|e| Error::Io(format!("writing password to kinit: {e}")))?;
            }
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| Error::Io(format!("waiting for kerberos tool: {e}")))
    }

    /// List the cache and build a credential from the TGT entry.
    async fn read_ticket(&self) -> Result<Credential> {
        let mut cmd = self.command(&self.settings.tools.klist);
        cmd.arg("-f");
        let output = self.run(cmd, None).await?;
        if !output.status.success() {
            return Err(Error::Parse(format!(
                "klist failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let info = klist::parse(&String::from_utf8_lossy(&output.stdout))?;
        let now_local = chrono::Local::now().naive_local();
        let now = Instant::now();
        let lifetime = klist::remaining(info.expires, now_local)
            .ok_or_else(|| Error::Expired(format!("TGT expired at {}", info.expires)))?;

        let subject = info
            .default_principal
            .clone()
            .unwrap_or_else(|| self.settings.qualified_principal());
        let mut credential =
            Credential::new(subject, now + lifetime, self.cache_name.clone().into_bytes())?;
        if info.renewable() {
            let renew_until = info
                .renew_until
                .and_then(|limit| klist::remaining(limit, now_local))
                .map(|left| now + left);
            credential = credential.with_renewal(renew_until);
        }

        debug!(
            server = %info.server,
            expires = %info.expires,
            renewable = credential.renewable(),
            "read TGT from cache"
        );
        Ok(credential)
    }

    fn password_line(&self) -> Option<Secret<String>> {
        let guard = self.password.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map(|pw| Secret::new(format!("{}\n", pw.expose())))
    }
}

fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = stderr.trim();
    if text.is_empty() {
        format!("exited with {}", output.status)
    } else {
        text.to_string()
    }
}

impl CredentialProvider for KinitProvider {
    fn id(&self) -> &str {
        "kinit"
    }

    fn acquire(&self) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + '_>> {
        Box::pin(async move {
            let principal = self.settings.qualified_principal();
            let mut cmd = self.command(&self.settings.tools.kinit);

            let stdin = match &self.settings.keytab {
                Some(keytab) => {
                    cmd.arg("-k").arg("-t").arg(keytab).arg(&principal);
                    None
                }
                None => {
                    cmd.arg(&principal);
                    Some(self.password_line().ok_or_else(|| {
                        Error::Login("password has been wiped; cannot log in".into())
                    })?)
                }
            };

            debug!(principal = %principal, "running kinit");
            let output = self.run(cmd, stdin).await?;
            if !output.status.success() {
                return Err(Error::Login(failure_text(&output)));
            }
            self.read_ticket().await
        })
    }

    fn renew<'a>(
        &'a self,
        current: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + 'a>> {
        Box::pin(async move {
            if !current.can_renew() {
                return Err(Error::NotRenewable);
            }
            let mut cmd = self.command(&self.settings.tools.kinit);
            cmd.arg("-R");
            let output = self.run(cmd, None).await?;
            if !output.status.success() {
                return Err(Error::Renewal(failure_text(&output)));
            }
            self.read_ticket().await
        })
    }

    fn logout<'a>(
        &'a self,
        current: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let cmd = self.command(&self.settings.tools.kdestroy);
            let output = self.run(cmd, None).await?;
            if !output.status.success() {
                return Err(Error::Logout(failure_text(&output)));
            }
            info!(subject = current.subject(), "credential cache destroyed");
            Ok(())
        })
    }

    fn wipe_secrets(&self) {
        let mut guard = self.password.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut password) = guard.take() {
            password.wipe();
            debug!("password wiped");
        }
    }
}
