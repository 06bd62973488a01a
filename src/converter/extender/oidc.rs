use super::Extender;
use crate::constants::OIDC_EXTENSION_TYPE;
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{Extension, KubeApiServerConfig, Shoot, ShootOidcConfig};

/// Enables the OIDC extension and passes the primary issuer to the API server
#[derive(Debug, Default)]
pub struct OidcExtender;

impl Extender for OidcExtender {
    fn name(&self) -> &'static str {
        "oidc"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let extension = Extension {
            r#type: OIDC_EXTENSION_TYPE.to_string(),
            provider_config: None,
            disabled: Some(false),
        };
        match shoot
            .spec
            .extensions
            .iter_mut()
            .find(|e| e.r#type == OIDC_EXTENSION_TYPE)
        {
            Some(existing) => *existing = extension,
            None => shoot.spec.extensions.push(extension),
        }

        let oidc = &runtime.spec.shoot.kubernetes.kube_api_server.oidc_config;
        let api_server = shoot
            .spec
            .kubernetes
            .kube_api_server
            .get_or_insert_with(KubeApiServerConfig::default);
        api_server.oidc_config = Some(ShootOidcConfig {
            client_id: oidc.client_id.clone(),
            issuer_url: oidc.issuer_url.clone(),
            groups_claim: oidc.groups_claim.clone(),
            groups_prefix: oidc.groups_prefix.clone(),
            signing_algs: oidc.signing_algs.clone(),
            username_claim: oidc.username_claim.clone(),
            username_prefix: oidc.username_prefix.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::extender::testutils::{empty_shoot, runtime};

    #[test]
    fn test_extension_added_once() {
        let mut rt = runtime();
        rt.spec.shoot.kubernetes.kube_api_server.oidc_config.client_id = Some("client".to_string());
        rt.spec.shoot.kubernetes.kube_api_server.oidc_config.issuer_url = Some("https://issuer".to_string());

        let mut shoot = empty_shoot();
        OidcExtender.extend(&rt, &mut shoot).unwrap();
        OidcExtender.extend(&rt, &mut shoot).unwrap();

        assert_eq!(shoot.spec.extensions.len(), 1);
        assert!(shoot.is_extension_enabled(OIDC_EXTENSION_TYPE));
        let oidc = shoot.spec.kubernetes.kube_api_server.unwrap().oidc_config.unwrap();
        assert_eq!(oidc.client_id.as_deref(), Some("client"));
        assert_eq!(oidc.issuer_url.as_deref(), Some("https://issuer"));
    }
}
