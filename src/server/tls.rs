//! Server-side TLS: loading certificate pairs and picking one per handshake

use crate::{errors::Error, opts::TlsPair};
use rustls::{
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName},
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
    ServerConfig,
};
use std::{fs::File, io, io::BufReader, path::Path, sync::Arc};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

/// Builds the acceptor shared by every worker.
///
/// Pairs that fail to load are logged and skipped. Fails only when none
/// loads, with the last load error.
pub(crate) fn acceptor(pairs: &[TlsPair]) -> Result<TlsAcceptor, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut keys = Vec::with_capacity(pairs.len());
    let mut last_err = None;

    for pair in pairs {
        match load_pair(&provider, pair) {
            Ok(key) => keys.push(Arc::new(key)),
            Err(e) => {
                warn!(error = %e, "skipping TLS pair");
                last_err = Some(e);
            }
        }
    }

    if keys.is_empty() {
        return Err(last_err.unwrap_or(Error::EmptyCerts));
    }

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver { keys }));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_pair(provider: &CryptoProvider, pair: &TlsPair) -> Result<CertifiedKey, Error> {
    let load = || -> io::Result<CertifiedKey> {
        let certs = rustls_pemfile::certs(&mut open(&pair.crt)?)
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()?;
        if certs.is_empty() {
            return Err(invalid("no certificate found"));
        }

        let key = rustls_pemfile::private_key(&mut open(&pair.key)?)?
            .ok_or_else(|| invalid("no private key found"))?;
        let signing = provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(CertifiedKey::new(certs, signing))
    };

    load().map_err(|source| Error::TlsPair {
        crt: pair.crt.clone(),
        key: pair.key.clone(),
        source,
    })
}

#[inline]
fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

#[inline]
fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Picks the first pair whose leaf certificate covers the SNI name, the
/// first pair overall when nothing matches or no name was sent.
#[derive(Debug)]
struct SniResolver {
    keys: Vec<Arc<CertifiedKey>>,
}

impl SniResolver {
    fn pick(&self, name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        name.and_then(|name| self.find(name))
            .or_else(|| self.keys.first())
            .cloned()
    }

    fn find(&self, name: &str) -> Option<&Arc<CertifiedKey>> {
        let name = ServerName::try_from(name).ok()?;

        self.keys.iter().find(|key| {
            key.cert.first().is_some_and(|der| {
                webpki::EndEntityCert::try_from(der)
                    .is_ok_and(|cert| cert.verify_is_valid_for_subject_name(&name).is_ok())
            })
        })
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.pick(hello.server_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("webworkers-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Writes a self-signed pair for `name` and returns its paths.
    fn self_signed(name: &str) -> TlsPair {
        let generated = rcgen::generate_simple_self_signed(vec![name.to_owned()]).unwrap();

        TlsPair::new(
            temp_file(&format!("{name}.crt"), &generated.cert.pem()),
            temp_file(&format!("{name}.key"), &generated.key_pair.serialize_pem()),
        )
    }

    fn resolver(pairs: &[TlsPair]) -> SniResolver {
        let provider = rustls::crypto::ring::default_provider();
        let keys = pairs
            .iter()
            .map(|pair| Arc::new(load_pair(&provider, pair).unwrap()))
            .collect();

        SniResolver { keys }
    }

    #[test]
    fn bad_pair_skipped() {
        let good = self_signed("skip.localhost");
        let pairs = [TlsPair::new("/nonexistent/a.crt", "/nonexistent/a.key"), good];

        assert!(acceptor(&pairs).is_ok());
    }

    #[test]
    fn picks_by_server_name() {
        let pairs = [self_signed("alpha.localhost"), self_signed("beta.localhost")];
        let resolver = resolver(&pairs);
        let alpha = &resolver.keys[0];
        let beta = &resolver.keys[1];

        #[rustfmt::skip]
        let cases: [(Option<&str>, &Arc<CertifiedKey>); 5] = [
            (Some("alpha.localhost"), alpha),
            (Some("beta.localhost"),  beta),
            (Some("gamma.localhost"), alpha),
            (Some("not a name"),      alpha),
            (None,                    alpha),
        ];

        for (name, expected) in cases {
            let picked = resolver.pick(name).unwrap();
            assert!(Arc::ptr_eq(&picked, expected), "{name:?}");
        }
    }

    #[test]
    fn empty_list() {
        assert!(matches!(acceptor(&[]).err(), Some(Error::EmptyCerts)));
    }

    #[test]
    fn missing_files() {
        let pairs = [
            TlsPair::new("/nonexistent/a.crt", "/nonexistent/a.key"),
            TlsPair::new("/nonexistent/b.crt", "/nonexistent/b.key"),
        ];

        match acceptor(&pairs) {
            Err(Error::TlsPair { crt, source, .. }) => {
                assert_eq!(crt, PathBuf::from("/nonexistent/b.crt"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("loaded a missing pair"),
        }
    }

    #[test]
    fn not_pem() {
        let crt = temp_file("garbage.crt", "definitely not a certificate\n");
        let key = temp_file("garbage.key", "nor a key\n");

        let result = acceptor(&[TlsPair::new(&crt, &key)]);
        let _ = std::fs::remove_file(&crt);
        let _ = std::fs::remove_file(&key);

        match result {
            Err(Error::TlsPair { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
                assert_eq!(source.to_string(), "no certificate found");
            }
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("loaded a garbage pair"),
        }
    }
}
