use super::Extender;
use crate::constants::{ANNOTATION_LICENCE_TYPE, ANNOTATION_RUNTIME_GENERATION, ANNOTATION_RUNTIME_ID};
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::Shoot;
use std::collections::BTreeMap;

/// Stamps the runtime identity and the applied generation on the shoot.
///
/// The generation annotation is what drift detection compares against later.
#[derive(Debug, Default)]
pub struct AnnotationsExtender;

impl Extender for AnnotationsExtender {
    fn name(&self) -> &'static str {
        "annotations"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let runtime_id = runtime
            .runtime_id()
            .ok_or_else(|| Error::conversion(self.name(), "runtime has no runtime-id label"))?;

        let mut annotations = BTreeMap::from([
            (ANNOTATION_RUNTIME_ID.to_string(), runtime_id.to_string()),
            (
                ANNOTATION_RUNTIME_GENERATION.to_string(),
                runtime.generation().to_string(),
            ),
        ]);
        if let Some(licence) = &runtime.spec.shoot.licence_type {
            annotations.insert(ANNOTATION_LICENCE_TYPE.to_string(), licence.clone());
        }

        shoot.metadata.annotations = Some(annotations);
        Ok(())
    }
}
