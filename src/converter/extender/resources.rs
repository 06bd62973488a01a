use super::Extender;
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{NamedResourceReference, Shoot};

/// Patch path only: keeps resource references other components added to the live shoot
#[derive(Debug)]
pub struct ResourcesExtender {
    resources: Vec<NamedResourceReference>,
}

impl ResourcesExtender {
    pub fn new(resources: Vec<NamedResourceReference>) -> Self {
        Self { resources }
    }
}

impl Extender for ResourcesExtender {
    fn name(&self) -> &'static str {
        "resources"
    }

    fn extend(&self, _runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        shoot.spec.resources.clone_from(&self.resources);
        Ok(())
    }
}
