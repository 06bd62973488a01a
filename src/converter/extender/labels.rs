use super::Extender;
use crate::constants::{LABEL_GLOBAL_ACCOUNT_ID, LABEL_SUBACCOUNT_ID, SHOOT_LABEL_ACCOUNT, SHOOT_LABEL_SUBACCOUNT};
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::Shoot;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Copies account identifiers from the Runtime labels
#[derive(Debug, Default)]
pub struct LabelsExtender;

impl Extender for LabelsExtender {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let source = runtime.labels();
        let mut labels = BTreeMap::new();
        for (from, to) in [
            (LABEL_GLOBAL_ACCOUNT_ID, SHOOT_LABEL_ACCOUNT),
            (LABEL_SUBACCOUNT_ID, SHOOT_LABEL_SUBACCOUNT),
        ] {
            if let Some(value) = source.get(from) {
                labels.insert(to.to_string(), value.clone());
            }
        }
        shoot.metadata.labels = Some(labels);
        Ok(())
    }
}
