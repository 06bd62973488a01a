use super::Extender;
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{Dns, DnsIncludeExclude, DnsProvider, Shoot};

/// Primary DNS provider and the `<shoot>.<prefix>` domain
#[derive(Debug)]
pub struct DnsExtender {
    secret_name: String,
    domain_prefix: String,
    provider_type: String,
}

impl DnsExtender {
    pub fn new(
        secret_name: impl Into<String>,
        domain_prefix: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Self {
        Self {
            secret_name: secret_name.into(),
            domain_prefix: domain_prefix.into(),
            provider_type: provider_type.into(),
        }
    }
}

impl Extender for DnsExtender {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let shoot_name = &runtime.spec.shoot.name;
        if shoot_name.is_empty() {
            return Err(Error::conversion(self.name(), "shoot name is empty"));
        }
        let domain = format!("{shoot_name}.{}", self.domain_prefix);

        shoot.spec.dns = Some(Dns {
            domain: Some(domain.clone()),
            providers: vec![DnsProvider {
                domains: Some(DnsIncludeExclude {
                    include: vec![domain],
                }),
                primary: Some(true),
                secret_name: Some(self.secret_name.clone()),
                r#type: Some(self.provider_type.clone()),
            }],
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::extender::testutils::{empty_shoot, runtime};

    #[test]
    fn test_dns_domain_and_provider() {
        let mut shoot = empty_shoot();
        DnsExtender::new("dns-secret", "dev.kyma.ondemand.com", "aws-route53")
            .extend(&runtime(), &mut shoot)
            .unwrap();

        assert_eq!(shoot.dns_domain(), Some("c-6ea9b9b.dev.kyma.ondemand.com"));
        let provider = &shoot.spec.dns.as_ref().unwrap().providers[0];
        assert_eq!(provider.primary, Some(true));
        assert_eq!(provider.secret_name.as_deref(), Some("dns-secret"));
        assert_eq!(provider.r#type.as_deref(), Some("aws-route53"));
        assert_eq!(
            provider.domains.as_ref().unwrap().include,
            vec!["c-6ea9b9b.dev.kyma.ondemand.com".to_string()]
        );
    }
}
