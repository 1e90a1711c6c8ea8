//! OfficeHour: one count during business hours, another outside them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Weekday;
use serde::Deserialize;
use serde_json::Value;

use nopas_core::{Count, GenericSubPolicy, ScalingWindow};
use nopas_resources::Resource;

use crate::context::EvaluationContext;
use crate::error::{PolicyError, PolicyResult};
use crate::subpolicy::{SubPolicyKind, decode_metadata, managed_names, required};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Metadata {
    begin: Option<u32>,
    end: Option<u32>,
    on_count: Option<Count>,
    off_count: Option<Count>,
    #[serde(default)]
    weekdays_only: bool,
}

#[derive(Clone)]
pub struct OfficeHour {
    managed: Vec<Arc<Resource>>,
    hours: ScalingWindow,
    off_count: Count,
    weekdays_only: bool,
    metadata: Value,
}

impl OfficeHour {
    const KIND: SubPolicyKind = SubPolicyKind::OfficeHour;

    pub fn new(managed: Vec<Arc<Resource>>, metadata: &Value) -> PolicyResult<Self> {
        let policy = Self::KIND.as_str();
        let raw: Metadata = decode_metadata(policy, metadata)?;

        let hours = ScalingWindow {
            begin: required(policy, "Begin", raw.begin)?,
            end: required(policy, "End", raw.end)?,
            count: required(policy, "OnCount", raw.on_count)?,
        };
        let off_count = required(policy, "OffCount", raw.off_count)?;

        if !hours.is_valid() {
            return Err(PolicyError::InvalidMetadata {
                policy: policy.to_string(),
                reason: format!(
                    "need Begin < End <= 1440, got [{}, {})",
                    hours.begin, hours.end
                ),
            });
        }

        Ok(Self {
            managed,
            hours,
            off_count,
            weekdays_only: raw.weekdays_only,
            metadata: metadata.clone(),
        })
    }

    pub fn managed_resources(&self) -> &[Arc<Resource>] {
        &self.managed
    }

    pub fn count_at(&self, minute_of_day: u32, weekday: Weekday) -> Count {
        let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        if self.weekdays_only && weekend {
            return self.off_count;
        }
        if self.hours.contains(minute_of_day) {
            self.hours.count
        } else {
            self.off_count
        }
    }

    pub fn recommend(&self, ctx: &EvaluationContext) -> BTreeMap<String, Count> {
        let count = self.count_at(ctx.minute_of_day, ctx.weekday);
        self.managed
            .iter()
            .map(|r| (r.name().to_string(), count))
            .collect()
    }

    pub fn to_generic(&self) -> GenericSubPolicy {
        GenericSubPolicy {
            name: Self::KIND.as_str().to_string(),
            managed_resources: managed_names(&self.managed),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::subpolicy::tests::resources;

    fn office(weekdays_only: bool) -> OfficeHour {
        let managed = resources(&["web"]).into_values().collect();
        OfficeHour::new(
            managed,
            &json!({
                "Begin": 540,
                "End": 1080,
                "OnCount": 6,
                "OffCount": 2,
                "WeekdaysOnly": weekdays_only,
            }),
        )
        .unwrap()
    }

    #[test]
    fn on_during_hours_off_outside() {
        let policy = office(false);
        assert_eq!(policy.count_at(539, Weekday::Wed), 2);
        assert_eq!(policy.count_at(540, Weekday::Wed), 6);
        assert_eq!(policy.count_at(1079, Weekday::Wed), 6);
        assert_eq!(policy.count_at(1080, Weekday::Wed), 2);
        assert_eq!(policy.count_at(600, Weekday::Sat), 6);
    }

    #[test]
    fn weekdays_only_is_off_on_weekends() {
        let policy = office(true);
        assert_eq!(policy.count_at(600, Weekday::Fri), 6);
        assert_eq!(policy.count_at(600, Weekday::Sat), 2);
        assert_eq!(policy.count_at(600, Weekday::Sun), 2);

        let ctx = EvaluationContext::at_minute(600).with_weekday(Weekday::Sun);
        assert_eq!(policy.recommend(&ctx)["web"], 2);
    }

    #[test]
    fn requires_all_counts() {
        let managed = resources(&["web"]).into_values().collect();
        let err = OfficeHour::new(managed, &json!({"Begin": 540, "End": 1080, "OnCount": 6}))
            .err()
            .unwrap();
        assert!(matches!(err, PolicyError::MissingMetadata { ref field, .. } if field == "OffCount"));
    }

    #[test]
    fn end_past_midnight_is_invalid() {
        let managed = resources(&["web"]).into_values().collect();
        let err = OfficeHour::new(
            managed,
            &json!({"Begin": 540, "End": 1500, "OnCount": 6, "OffCount": 2}),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PolicyError::InvalidMetadata { .. }));
    }

    #[test]
    fn generic_form_is_lossless() {
        let generic = office(true).to_generic();
        let managed = resources(&["web"]).into_values().collect();
        let rebuilt = OfficeHour::new(managed, &generic.metadata).unwrap();
        assert_eq!(rebuilt.to_generic(), generic);
        assert_eq!(generic.metadata["WeekdaysOnly"], true);
    }
}
