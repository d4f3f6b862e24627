//! probe.rs - differential MLB probing
//!
//! The recovery service answers a board-id/MLB/channel triple with a
//! product. A serial it recognizes gets its shipped release for the
//! `default` channel and the newest one for `latest`; a serial it does
//! not recognize gets the same product for both. Everything here is
//! comparison logic over those products.
//!
//!   selfcheck  six queries on the reference board, five ordered rules
//!   verify     baseline + three queries for one board/MLB
//!   guess      per-candidate queries over a board database

use std::fmt;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::boards::BoardDatabase;
use crate::error::Result;
use crate::mlb::{is_anonymous, product_mlb, MLB_PRODUCT, MLB_VALID, MLB_ZERO};
use crate::session::{Channel, ImageInfo};

/// Recovery-image lookups for one board/MLB/channel triple.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn image_info(&self, board_id: &str, mlb: &str, channel: Channel) -> Result<ImageInfo>;

    async fn product(&self, board_id: &str, mlb: &str, channel: Channel) -> Result<String> {
        Ok(self.image_info(board_id, mlb, channel).await?.product)
    }
}

/// The six self-check products, all on the reference board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfCheckObservation {
    pub valid_default: String,
    pub valid_latest: String,
    pub product_default: String,
    pub product_latest: String,
    pub generic_default: String,
    pub generic_latest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelfCheckFailure {
    #[error("cannot determine any previous product, got {0}")]
    NoPreviousProduct(String),
    #[error("latest and default do not match for product MLB")]
    ProductChannelsDiffer,
    #[error("generic MLB gives different product")]
    GenericChannelsDiffer,
    #[error("cannot determine unified latest product")]
    NoUnifiedLatest,
    #[error("valid and product MLB give mismatch")]
    ValidProductMismatch,
}

/// Apply the self-check rules in order; the first violated rule wins.
pub fn evaluate_self_check(obs: &SelfCheckObservation) -> Result<(), SelfCheckFailure> {
    if obs.valid_default == obs.valid_latest {
        return Err(SelfCheckFailure::NoPreviousProduct(obs.valid_default.clone()));
    }
    if obs.product_default != obs.product_latest {
        return Err(SelfCheckFailure::ProductChannelsDiffer);
    }
    if obs.generic_default != obs.generic_latest {
        return Err(SelfCheckFailure::GenericChannelsDiffer);
    }
    if obs.valid_latest != obs.generic_latest {
        return Err(SelfCheckFailure::NoUnifiedLatest);
    }
    if obs.product_default != obs.valid_default {
        return Err(SelfCheckFailure::ValidProductMismatch);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedModel {
    pub board_id: String,
    pub model: String,
    pub default_product: String,
    pub latest_product: String,
}

/// Outcome of a probing workflow. Indeterminate outcomes are verdicts too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    SelfCheckPassed,
    SelfCheckFailed {
        #[serde(serialize_with = "serialize_display")]
        reason: SelfCheckFailure,
    },
    Supported {
        board_id: String,
        mlb: String,
        product: String,
    },
    ProbablyUnsupported {
        board_id: String,
        mlb: String,
        product: String,
    },
    Indeterminate {
        board_id: String,
        mlb: String,
    },
    ModelSupport {
        mlb: String,
        models: Vec<SupportedModel>,
    },
    NoSupportedModels {
        mlb: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Unknown,
    Failure,
}

impl ProbeVerdict {
    pub fn outcome(&self) -> Outcome {
        match self {
            ProbeVerdict::SelfCheckPassed
            | ProbeVerdict::Supported { .. }
            | ProbeVerdict::ProbablyUnsupported { .. }
            | ProbeVerdict::ModelSupport { .. } => Outcome::Success,
            ProbeVerdict::Indeterminate { .. } | ProbeVerdict::NoSupportedModels { .. } => {
                Outcome::Unknown
            }
            ProbeVerdict::SelfCheckFailed { .. } => Outcome::Failure,
        }
    }
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeVerdict::SelfCheckPassed => {
                write!(f, "Found no discrepancies with MLB validation algorithm!")
            }
            ProbeVerdict::SelfCheckFailed { reason } => write!(f, "{reason}"),
            ProbeVerdict::Supported { mlb, .. } => {
                write!(f, "{mlb} MLB looks valid and supported!")
            }
            ProbeVerdict::ProbablyUnsupported { mlb, .. } => {
                write!(f, "{mlb} MLB looks valid, but probably unsupported!")
            }
            ProbeVerdict::Indeterminate { .. } => {
                write!(f, "Run selfcheck, check your board-id, or try again later!")
            }
            ProbeVerdict::ModelSupport { mlb, models } => {
                write!(f, "MLB {mlb} looks supported for:")?;
                for m in models {
                    write!(
                        f,
                        "\n- {}, up to {}, default: {}, latest: {}",
                        m.board_id, m.model, m.default_product, m.latest_product
                    )?;
                }
                Ok(())
            }
            ProbeVerdict::NoSupportedModels { mlb } => {
                write!(f, "Failed to determine supported models for MLB {mlb}!")
            }
        }
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// Classify one board/MLB from its two channel products and the
/// reference board's anonymous latest product.
pub fn classify(
    board_id: &str,
    mlb: &str,
    baseline_latest: &str,
    default_product: &str,
    latest_product: &str,
) -> ProbeVerdict {
    let (board_id, mlb) = (board_id.to_string(), mlb.to_string());
    if default_product == latest_product {
        return ProbeVerdict::Indeterminate { board_id, mlb };
    }
    let product = latest_product.to_string();
    if latest_product == baseline_latest {
        ProbeVerdict::Supported {
            board_id,
            mlb,
            product,
        }
    } else {
        ProbeVerdict::ProbablyUnsupported {
            board_id,
            mlb,
            product,
        }
    }
}

pub struct Prober<L> {
    lookup: L,
    reference_board: String,
}

impl<L: ProductLookup> Prober<L> {
    pub fn new(lookup: L, reference_board: impl Into<String>) -> Self {
        Self {
            lookup,
            reference_board: reference_board.into(),
        }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    async fn reference(&self, mlb: &str, channel: Channel) -> Result<String> {
        self.lookup.product(&self.reference_board, mlb, channel).await
    }

    /// Anonymous latest product of the reference board.
    async fn baseline(&self) -> Result<String> {
        self.reference(MLB_ZERO, Channel::Latest).await
    }

    pub async fn self_check(&self) -> Result<ProbeVerdict> {
        info!(board = %self.reference_board, "running self-check");
        let obs = SelfCheckObservation {
            valid_default: self.reference(MLB_VALID, Channel::Default).await?,
            valid_latest: self.reference(MLB_VALID, Channel::Latest).await?,
            product_default: self.reference(MLB_PRODUCT, Channel::Default).await?,
            product_latest: self.reference(MLB_PRODUCT, Channel::Latest).await?,
            generic_default: self.reference(MLB_ZERO, Channel::Default).await?,
            generic_latest: self.reference(MLB_ZERO, Channel::Latest).await?,
        };
        debug!(?obs, "self-check products");

        Ok(match evaluate_self_check(&obs) {
            Ok(()) => ProbeVerdict::SelfCheckPassed,
            Err(reason) => ProbeVerdict::SelfCheckFailed { reason },
        })
    }

    pub async fn verify(&self, board_id: &str, mlb: &str) -> Result<ProbeVerdict> {
        info!(board = %board_id, mlb = %mlb, "verifying MLB");
        let baseline = self.baseline().await?;
        let valid_default = self.lookup.product(board_id, mlb, Channel::Default).await?;
        let valid_latest = self.lookup.product(board_id, mlb, Channel::Latest).await?;
        let derived = product_mlb(mlb);
        let product_default = match self.lookup.product(board_id, &derived, Channel::Default).await {
            Ok(product) => Some(product),
            Err(e) => {
                warn!(board = %board_id, mlb = %derived, "product-class query failed: {e}");
                None
            }
        };
        debug!(
            %baseline,
            %valid_default,
            %valid_latest,
            ?product_default,
            "verify products"
        );

        Ok(classify(board_id, mlb, &baseline, &valid_default, &valid_latest))
    }

    /// Find the boards in `boards` that accept `mlb`. Candidates whose
    /// queries fail are skipped.
    pub async fn guess(&self, mlb: &str, boards: &BoardDatabase) -> Result<ProbeVerdict> {
        let anonymous = is_anonymous(mlb);
        info!(mlb = %mlb, anonymous, candidates = boards.len(), "guessing supported boards");
        let baseline = self.baseline().await?;

        let mut models = Vec::new();
        for (board_id, model) in boards.iter() {
            let probed = if anonymous {
                self.probe_anonymous(board_id, mlb, &baseline).await
            } else {
                self.probe_identified(board_id, mlb).await
            };
            match probed {
                Ok(Some((default_product, latest_product))) => models.push(SupportedModel {
                    board_id: board_id.to_string(),
                    model: model.to_string(),
                    default_product,
                    latest_product,
                }),
                Ok(None) => {}
                Err(e) => warn!(board = %board_id, "skipping candidate: {e}"),
            }
        }

        let mlb = mlb.to_string();
        Ok(if models.is_empty() {
            ProbeVerdict::NoSupportedModels { mlb }
        } else {
            ProbeVerdict::ModelSupport { mlb, models }
        })
    }

    /// Boards on a different recovery track than the baseline are
    /// dropped before the caller's serial is tried.
    async fn probe_anonymous(
        &self,
        board_id: &str,
        mlb: &str,
        baseline: &str,
    ) -> Result<Option<(String, String)>> {
        let board_latest = self.lookup.product(board_id, MLB_ZERO, Channel::Latest).await?;
        if board_latest != baseline {
            debug!(board = %board_id, %board_latest, "different recovery track");
            return Ok(None);
        }
        let user_default = self.lookup.product(board_id, mlb, Channel::Default).await?;
        Ok((user_default != baseline).then(|| (user_default, baseline.to_string())))
    }

    async fn probe_identified(&self, board_id: &str, mlb: &str) -> Result<Option<(String, String)>> {
        let user_latest = self.lookup.product(board_id, mlb, Channel::Latest).await?;
        let user_default = self.lookup.product(board_id, mlb, Channel::Default).await?;
        Ok((user_latest != user_default).then_some((user_default, user_latest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mlb::RECENT_MAC;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type Call = (String, String, Channel);

    /// Canned products per triple; unknown triples fail like a dropped query.
    #[derive(Default)]
    struct FakeLookup {
        answers: BTreeMap<(String, String, &'static str), String>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeLookup {
        fn answer(mut self, board: &str, mlb: &str, channel: Channel, product: &str) -> Self {
            self.answers
                .insert((board.into(), mlb.into(), channel.as_str()), product.into());
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProductLookup for FakeLookup {
        async fn image_info(&self, board_id: &str, mlb: &str, channel: Channel) -> Result<ImageInfo> {
            self.calls
                .lock()
                .unwrap()
                .push((board_id.into(), mlb.into(), channel));
            let product = self
                .answers
                .get(&(board_id.to_string(), mlb.to_string(), channel.as_str()))
                .ok_or(Error::MissingInfoKey("AP"))?;
            Ok(ImageInfo {
                product: product.clone(),
                image_url: String::new(),
                image_hash: String::new(),
                image_token: String::new(),
                chunklist_url: String::new(),
                chunklist_hash: String::new(),
                chunklist_token: String::new(),
                extras: BTreeMap::new(),
            })
        }
    }

    const OLD: &str = "041-00001";
    const NEW: &str = "041-99999";

    fn passing() -> SelfCheckObservation {
        SelfCheckObservation {
            valid_default: OLD.into(),
            valid_latest: NEW.into(),
            product_default: OLD.into(),
            product_latest: OLD.into(),
            generic_default: NEW.into(),
            generic_latest: NEW.into(),
        }
    }

    #[test]
    fn self_check_rules_in_order() {
        assert_eq!(evaluate_self_check(&passing()), Ok(()));

        let mut obs = passing();
        obs.valid_default = NEW.into();
        assert_eq!(
            evaluate_self_check(&obs),
            Err(SelfCheckFailure::NoPreviousProduct(NEW.into()))
        );

        let mut obs = passing();
        obs.product_latest = NEW.into();
        assert_eq!(evaluate_self_check(&obs), Err(SelfCheckFailure::ProductChannelsDiffer));

        let mut obs = passing();
        obs.generic_default = OLD.into();
        assert_eq!(evaluate_self_check(&obs), Err(SelfCheckFailure::GenericChannelsDiffer));

        let mut obs = passing();
        obs.valid_latest = "041-55555".into();
        assert_eq!(evaluate_self_check(&obs), Err(SelfCheckFailure::NoUnifiedLatest));

        let mut obs = passing();
        obs.product_default = "041-22222".into();
        obs.product_latest = "041-22222".into();
        assert_eq!(evaluate_self_check(&obs), Err(SelfCheckFailure::ValidProductMismatch));
    }

    #[test]
    fn failure_messages() {
        assert_eq!(
            SelfCheckFailure::NoPreviousProduct("X".into()).to_string(),
            "cannot determine any previous product, got X"
        );
        assert_eq!(
            SelfCheckFailure::ValidProductMismatch.to_string(),
            "valid and product MLB give mismatch"
        );
    }

    fn reference_service() -> FakeLookup {
        FakeLookup::default()
            .answer(RECENT_MAC, MLB_VALID, Channel::Default, OLD)
            .answer(RECENT_MAC, MLB_VALID, Channel::Latest, NEW)
            .answer(RECENT_MAC, MLB_PRODUCT, Channel::Default, OLD)
            .answer(RECENT_MAC, MLB_PRODUCT, Channel::Latest, OLD)
            .answer(RECENT_MAC, MLB_ZERO, Channel::Default, NEW)
            .answer(RECENT_MAC, MLB_ZERO, Channel::Latest, NEW)
            .answer(RECENT_MAC, &product_mlb(MLB_VALID), Channel::Default, OLD)
    }

    #[tokio::test]
    async fn self_check_queries_in_order() {
        let prober = Prober::new(reference_service(), RECENT_MAC);
        assert_eq!(prober.self_check().await.unwrap(), ProbeVerdict::SelfCheckPassed);

        let order: Vec<(String, Channel)> = prober
            .lookup()
            .calls()
            .into_iter()
            .map(|(_, mlb, ch)| (mlb, ch))
            .collect();
        assert_eq!(
            order,
            vec![
                (MLB_VALID.to_string(), Channel::Default),
                (MLB_VALID.to_string(), Channel::Latest),
                (MLB_PRODUCT.to_string(), Channel::Default),
                (MLB_PRODUCT.to_string(), Channel::Latest),
                (MLB_ZERO.to_string(), Channel::Default),
                (MLB_ZERO.to_string(), Channel::Latest),
            ]
        );
    }

    #[tokio::test]
    async fn self_check_reports_failure_as_verdict() {
        let lookup = reference_service().answer(RECENT_MAC, MLB_ZERO, Channel::Default, OLD);
        let verdict = Prober::new(lookup, RECENT_MAC).self_check().await.unwrap();
        assert_eq!(
            verdict,
            ProbeVerdict::SelfCheckFailed {
                reason: SelfCheckFailure::GenericChannelsDiffer
            }
        );
        assert_eq!(verdict.outcome(), Outcome::Failure);
    }

    #[tokio::test]
    async fn self_check_query_failure_is_an_error() {
        let lookup = FakeLookup::default().answer(RECENT_MAC, MLB_VALID, Channel::Default, OLD);
        let err = Prober::new(lookup, RECENT_MAC).self_check().await.unwrap_err();
        assert!(matches!(err, Error::MissingInfoKey("AP")));
    }

    #[tokio::test]
    async fn reference_serial_is_valid_and_supported() {
        let prober = Prober::new(reference_service(), RECENT_MAC);
        let verdict = prober.verify(RECENT_MAC, MLB_VALID).await.unwrap();
        assert_eq!(
            verdict,
            ProbeVerdict::Supported {
                board_id: RECENT_MAC.into(),
                mlb: MLB_VALID.into(),
                product: NEW.into(),
            }
        );
        assert_eq!(verdict.to_string(), "F5K105303J9K3F71M MLB looks valid and supported!");

        let calls = prober.lookup().calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], (RECENT_MAC.into(), MLB_ZERO.into(), Channel::Latest));
        assert_eq!(
            calls[3],
            (RECENT_MAC.into(), "00000000000K3F700".into(), Channel::Default)
        );
    }

    #[tokio::test]
    async fn product_class_failure_keeps_the_verdict() {
        let lookup = FakeLookup::default()
            .answer(RECENT_MAC, MLB_ZERO, Channel::Latest, NEW)
            .answer(RECENT_MAC, MLB_VALID, Channel::Default, OLD)
            .answer(RECENT_MAC, MLB_VALID, Channel::Latest, NEW);
        let prober = Prober::new(lookup, RECENT_MAC);
        let verdict = prober.verify(RECENT_MAC, MLB_VALID).await.unwrap();
        assert_eq!(
            verdict,
            ProbeVerdict::Supported {
                board_id: RECENT_MAC.into(),
                mlb: MLB_VALID.into(),
                product: NEW.into(),
            }
        );
        assert_eq!(prober.lookup().calls().len(), 4);
    }

    #[tokio::test]
    async fn older_latest_is_probably_unsupported() {
        let lookup = reference_service()
            .answer("Mac-OLD", "C02000000000ABCD1", Channel::Default, "041-00100")
            .answer("Mac-OLD", "C02000000000ABCD1", Channel::Latest, "041-00200")
            .answer("Mac-OLD", &product_mlb("C02000000000ABCD1"), Channel::Default, "041-00100");
        let verdict = Prober::new(lookup, RECENT_MAC)
            .verify("Mac-OLD", "C02000000000ABCD1")
            .await
            .unwrap();
        assert!(matches!(verdict, ProbeVerdict::ProbablyUnsupported { ref product, .. } if product == "041-00200"));
        assert_eq!(verdict.outcome(), Outcome::Success);
    }

    #[tokio::test]
    async fn identical_channels_are_indeterminate() {
        let lookup = reference_service()
            .answer(RECENT_MAC, "F5K999999999ZZZZ1", Channel::Default, NEW)
            .answer(RECENT_MAC, "F5K999999999ZZZZ1", Channel::Latest, NEW)
            .answer(RECENT_MAC, &product_mlb("F5K999999999ZZZZ1"), Channel::Default, NEW);
        let verdict = Prober::new(lookup, RECENT_MAC)
            .verify(RECENT_MAC, "F5K999999999ZZZZ1")
            .await
            .unwrap();
        assert!(matches!(verdict, ProbeVerdict::Indeterminate { .. }));
        assert_eq!(verdict.outcome(), Outcome::Unknown);
        assert_eq!(
            verdict.to_string(),
            "Run selfcheck, check your board-id, or try again later!"
        );
    }

    #[test]
    fn classify_table() {
        assert!(matches!(classify("b", "m", NEW, OLD, NEW), ProbeVerdict::Supported { .. }));
        assert!(matches!(
            classify("b", "m", NEW, OLD, "041-5"),
            ProbeVerdict::ProbablyUnsupported { .. }
        ));
        assert!(matches!(classify("b", "m", NEW, NEW, NEW), ProbeVerdict::Indeterminate { .. }));
    }

    #[tokio::test]
    async fn anonymous_guess_drops_other_tracks_before_default_probe() {
        let mlb = "00000000000K3F700";
        let boards: BoardDatabase = [("Mac-AAA", "iMac20,1"), ("Mac-BBB", "MacBookPro9,1")]
            .into_iter()
            .collect();
        let lookup = reference_service()
            .answer("Mac-AAA", MLB_ZERO, Channel::Latest, NEW)
            .answer("Mac-AAA", mlb, Channel::Default, OLD)
            .answer("Mac-BBB", MLB_ZERO, Channel::Latest, "041-00777")
            .answer("Mac-BBB", mlb, Channel::Default, OLD);
        let prober = Prober::new(lookup, RECENT_MAC);
        let verdict = prober.guess(mlb, &boards).await.unwrap();

        assert_eq!(
            verdict,
            ProbeVerdict::ModelSupport {
                mlb: mlb.into(),
                models: vec![SupportedModel {
                    board_id: "Mac-AAA".into(),
                    model: "iMac20,1".into(),
                    default_product: OLD.into(),
                    latest_product: NEW.into(),
                }],
            }
        );
        let default_probes: Vec<String> = prober
            .lookup()
            .calls()
            .into_iter()
            .filter(|(_, m, ch)| m == mlb && *ch == Channel::Default)
            .map(|(board, _, _)| board)
            .collect();
        assert_eq!(default_probes, vec!["Mac-AAA".to_string()]);
    }

    #[tokio::test]
    async fn identified_guess_records_both_channels_and_skips_failures() {
        let mlb = MLB_VALID;
        let boards: BoardDatabase = [("Mac-AAA", "iMac20,1"), ("Mac-BBB", "MacPro7,1"), ("Mac-CCC", "Macmini8,1")]
            .into_iter()
            .collect();
        let lookup = reference_service()
            .answer("Mac-AAA", mlb, Channel::Latest, NEW)
            .answer("Mac-AAA", mlb, Channel::Default, NEW)
            // Mac-BBB: latest query fails
            .answer("Mac-BBB", mlb, Channel::Default, OLD)
            .answer("Mac-CCC", mlb, Channel::Latest, NEW)
            .answer("Mac-CCC", mlb, Channel::Default, OLD);
        let verdict = Prober::new(lookup, RECENT_MAC).guess(mlb, &boards).await.unwrap();

        match verdict {
            ProbeVerdict::ModelSupport { models, .. } => {
                assert_eq!(models.len(), 1);
                assert_eq!(models[0].board_id, "Mac-CCC");
                assert_eq!(models[0].default_product, OLD);
                assert_eq!(models[0].latest_product, NEW);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn guess_without_matches_is_unknown() {
        let boards: BoardDatabase = [("Mac-AAA", "iMac20,1")].into_iter().collect();
        let verdict = Prober::new(reference_service(), RECENT_MAC)
            .guess(MLB_VALID, &boards)
            .await
            .unwrap();
        assert_eq!(verdict, ProbeVerdict::NoSupportedModels { mlb: MLB_VALID.into() });
        assert_eq!(verdict.outcome(), Outcome::Unknown);
    }

    #[tokio::test]
    async fn guess_baseline_failure_is_an_error() {
        let boards: BoardDatabase = [("Mac-AAA", "iMac20,1")].into_iter().collect();
        let err = Prober::new(FakeLookup::default(), RECENT_MAC)
            .guess(MLB_ZERO, &boards)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingInfoKey(_)));
    }

    #[test]
    fn verdict_json_is_tagged() {
        let verdict = ProbeVerdict::SelfCheckFailed {
            reason: SelfCheckFailure::NoUnifiedLatest,
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "verdict": "self_check_failed",
                "reason": "cannot determine unified latest product"
            })
        );
    }
}
