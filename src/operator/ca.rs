//! Certificate authority adapter
//!
//! Certificate issuance internals are out of scope for this operator; an
//! external CA controller maintains a secret of pre-issued node keypairs.
//! This adapter exposes that secret through the [`CertificateAuthority`]
//! capability the model builder consumes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::catalog::{CertAndKey, CertificateAuthority};

/// Name of the secret the external CA controller keeps current
pub const ISSUED_CERTS_SECRET: &str = "quorum-ca-issued";

/// [`CertificateAuthority`] backed by a pre-issued certificate secret
pub struct SecretBackedCertificateAuthority {
    client: kube::Client,
}

impl SecretBackedCertificateAuthority {
    pub fn new(client: kube::Client) -> Self {
        SecretBackedCertificateAuthority { client }
    }
}

#[async_trait]
impl CertificateAuthority for SecretBackedCertificateAuthority {
    async fn issue_or_renew(
        &self,
        namespace: &str,
        node_names: &[String],
    ) -> Result<BTreeMap<String, CertAndKey>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let issued = secrets
            .get_opt(ISSUED_CERTS_SECRET)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Secret".to_string(),
                name: format!("{namespace}/{ISSUED_CERTS_SECRET}"),
            })?;

        let data = issued.data.unwrap_or_default();
        let mut certs = BTreeMap::new();
        for node in node_names {
            let cert = data.get(&format!("{node}.crt")).ok_or_else(|| {
                Error::CertificateIssuance(format!("no certificate issued for {node}"))
            })?;
            let key = data.get(&format!("{node}.key")).ok_or_else(|| {
                Error::CertificateIssuance(format!("no private key issued for {node}"))
            })?;
            certs.insert(
                node.clone(),
                CertAndKey {
                    cert: cert.0.clone(),
                    key: key.0.clone(),
                },
            );
        }
        Ok(certs)
    }
}
