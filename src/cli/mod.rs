//! The `caboot` command line client.

pub mod options;
pub mod report;

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use url::Url;

use crate::{
    client::HttpTransport,
    commons::{error::Error, util::file},
    config::Config,
    token::{ProvisionerRef, SigningKey, VerificationKey},
    trust::TrustAnchor,
};

use self::options::{GeneralOptions, ProvisionerArgs};

//------------ Context -------------------------------------------------------

/// Everything a command needs besides its own arguments.
///
/// Values given on the command line take precedence over the config file.
pub struct Context {
    config: Config,
    transport: HttpTransport,
}

impl Context {
    pub fn new(mut config: Config, general: &GeneralOptions) -> Self {
        if let Some(ca_url) = &general.ca_url {
            config.ca_url = Some(ca_url.clone());
        }
        if let Some(root) = &general.root {
            config.root = Some(root.clone());
        }
        if let Some(level) = general.log_level {
            config.log_level = level;
        }
        let transport = HttpTransport::new(config.http_timeout());
        Context { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn ca_url(&self) -> Result<Url, Error> {
        self.config
            .ca_url
            .clone()
            .ok_or_else(|| Error::invalid_request("no CA URL given, use --ca-url or set ca_url in the config"))
    }

    pub fn fingerprint(&self, arg: Option<String>) -> Result<String, Error> {
        arg.or_else(|| self.config.fingerprint.clone()).ok_or_else(|| {
            Error::invalid_request("no root fingerprint given, use --fingerprint or set fingerprint in the config")
        })
    }

    pub fn anchor(&self) -> Result<TrustAnchor, Error> {
        let root = self
            .config
            .root
            .as_deref()
            .ok_or_else(|| Error::invalid_request("no root certificate given, use --root or set root in the config"))?;
        TrustAnchor::load(root)
    }

    pub fn provisioner(&self, args: &ProvisionerArgs) -> Result<ProvisionerRef, Error> {
        let kid = args
            .kid
            .clone()
            .or_else(|| self.config.provisioner_kid.clone())
            .ok_or_else(|| Error::invalid_request("no provisioner key id given, use --kid"))?;
        let issuer = args
            .issuer
            .clone()
            .or_else(|| self.config.provisioner_issuer.clone())
            .ok_or_else(|| Error::invalid_request("no provisioner name given, use --issuer"))?;
        Ok(ProvisionerRef::new(kid, issuer))
    }

    pub fn signing_key(&self, args: &ProvisionerArgs) -> Result<SigningKey, Error> {
        match self.key_source(args)? {
            KeySource::Pem(path) => SigningKey::load_pem(&path),
            KeySource::Shared(path) => SigningKey::load_shared(&path),
        }
    }

    pub fn verification_key(&self, args: &ProvisionerArgs) -> Result<VerificationKey, Error> {
        match self.key_source(args)? {
            KeySource::Pem(path) => {
                let passphrase = self.passphrase(args)?;
                VerificationKey::load_pem(&path, passphrase.as_ref())
            }
            KeySource::Shared(path) => VerificationKey::load_shared(&path),
        }
    }

    pub fn passphrase(&self, args: &ProvisionerArgs) -> Result<Option<SecretString>, Error> {
        let path = args.password_file.as_deref().or(self.config.password_file.as_deref());
        self.read_passphrase(path)
    }

    pub fn read_passphrase(&self, path: Option<&Path>) -> Result<Option<SecretString>, Error> {
        Ok(path.map(file::read_passphrase).transpose()?)
    }

    fn key_source(&self, args: &ProvisionerArgs) -> Result<KeySource, Error> {
        if let Some(key) = &args.key {
            Ok(KeySource::Pem(key.clone()))
        } else if let Some(secret) = &args.secret_file {
            Ok(KeySource::Shared(secret.clone()))
        } else if let Some(key) = &self.config.provisioner_key {
            Ok(KeySource::Pem(key.clone()))
        } else if let Some(secret) = &self.config.provisioner_secret_file {
            Ok(KeySource::Shared(secret.clone()))
        } else {
            Err(Error::invalid_request(
                "no provisioner key given, use --key or --secret-file",
            ))
        }
    }
}

enum KeySource {
    Pem(PathBuf),
    Shared(PathBuf),
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{options::Options, *};

    fn context(args: &[&str], config: &str) -> Context {
        let options = Options::try_parse_from(args).unwrap();
        let config = Config::parse_str(config).unwrap();
        Context::new(config, &options.general)
    }

    #[test]
    fn command_line_wins_over_config() {
        let ctx = context(
            &["caboot", "--ca-url", "https://cli.example.com", "root", "root.crt"],
            "ca_url = \"https://config.example.com\"\nfingerprint = \"aabb\"\n",
        );
        assert_eq!(ctx.ca_url().unwrap().as_str(), "https://cli.example.com/");
        assert_eq!(ctx.fingerprint(None).unwrap(), "aabb");
        assert_eq!(ctx.fingerprint(Some("ccdd".into())).unwrap(), "ccdd");
    }

    #[test]
    fn missing_ca_url_is_reported() {
        let ctx = context(&["caboot", "root", "root.crt"], "");
        assert!(ctx.ca_url().is_err());
        assert!(ctx.anchor().is_err());
    }
}
