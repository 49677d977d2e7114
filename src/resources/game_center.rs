//! Game Center families, localization images and matchmaking metrics.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value;

use crate::client::AppStoreConnectClient;
use crate::context::CallContext;
use crate::envelope::Document;
use crate::error::{AscError, Result};
use crate::query::{ListTarget, MetricsOptions};
use crate::resources::{ResourceFamily, required_id};
use crate::upload::{AssetTarget, ImageAssetAttributes, UploadCoordinator, UploadOutcome};

resource_family! {
    GameCenterDetails {
        type: "gameCenterDetails",
        path: "v1/gameCenterDetails",
        attributes: Value,
        includes: [
            "app",
            "gameCenterAchievements",
            "gameCenterGroup",
            "gameCenterLeaderboardSets",
            "gameCenterLeaderboards",
        ],
    }
}

resource_family! {
    GameCenterGroups {
        type: "gameCenterGroups",
        path: "v1/gameCenterGroups",
        attributes: Value,
        filters: ["gameCenterDetails"],
        includes: [
            "gameCenterAchievements",
            "gameCenterDetails",
            "gameCenterLeaderboardSets",
            "gameCenterLeaderboards",
        ],
    }
}

resource_family! {
    GameCenterAchievements {
        type: "gameCenterAchievements",
        path: "v1/gameCenterAchievements",
        attributes: Value,
        filters: ["archived", "id", "referenceName"],
        includes: ["gameCenterDetail", "gameCenterGroup", "groupAchievement", "localizations", "releases"],
        fields: ["gameCenterAchievementLocalizations", "gameCenterAchievementReleases"],
    }
}

resource_family! {
    GameCenterAchievementLocalizations {
        type: "gameCenterAchievementLocalizations",
        path: "v1/gameCenterAchievementLocalizations",
        attributes: Value,
        includes: ["gameCenterAchievement", "gameCenterAchievementImage"],
    }
}

resource_family! {
    GameCenterAchievementReleases {
        type: "gameCenterAchievementReleases",
        path: "v1/gameCenterAchievementReleases",
        attributes: Value,
        filters: ["gameCenterDetail", "live"],
        includes: ["gameCenterAchievement", "gameCenterDetail"],
    }
}

resource_family! {
    GameCenterLeaderboards {
        type: "gameCenterLeaderboards",
        path: "v1/gameCenterLeaderboards",
        attributes: Value,
        filters: ["archived", "id", "referenceName"],
        includes: [
            "gameCenterDetail",
            "gameCenterGroup",
            "gameCenterLeaderboardSets",
            "groupLeaderboard",
            "localizations",
            "releases",
        ],
        fields: ["gameCenterLeaderboardLocalizations", "gameCenterLeaderboardReleases"],
    }
}

resource_family! {
    GameCenterLeaderboardLocalizations {
        type: "gameCenterLeaderboardLocalizations",
        path: "v1/gameCenterLeaderboardLocalizations",
        attributes: Value,
        includes: ["gameCenterLeaderboard", "gameCenterLeaderboardImage"],
    }
}

resource_family! {
    GameCenterLeaderboardReleases {
        type: "gameCenterLeaderboardReleases",
        path: "v1/gameCenterLeaderboardReleases",
        attributes: Value,
        filters: ["gameCenterDetail", "live"],
        includes: ["gameCenterDetail", "gameCenterLeaderboard"],
    }
}

resource_family! {
    GameCenterLeaderboardSets {
        type: "gameCenterLeaderboardSets",
        path: "v1/gameCenterLeaderboardSets",
        attributes: Value,
        filters: ["id", "referenceName"],
        includes: [
            "gameCenterDetail",
            "gameCenterGroup",
            "gameCenterLeaderboards",
            "groupLeaderboardSet",
            "localizations",
            "releases",
        ],
    }
}

resource_family! {
    GameCenterLeaderboardSetLocalizations {
        type: "gameCenterLeaderboardSetLocalizations",
        path: "v1/gameCenterLeaderboardSetLocalizations",
        attributes: Value,
        includes: ["gameCenterLeaderboardSet", "gameCenterLeaderboardSetImage"],
    }
}

resource_family! {
    GameCenterLeaderboardSetReleases {
        type: "gameCenterLeaderboardSetReleases",
        path: "v1/gameCenterLeaderboardSetReleases",
        attributes: Value,
        filters: ["gameCenterDetail", "live"],
        includes: ["gameCenterDetail", "gameCenterLeaderboardSet"],
    }
}

resource_family! {
    GameCenterActivities {
        type: "gameCenterActivities",
        path: "v1/gameCenterActivities",
        attributes: Value,
        includes: ["achievements", "gameCenterDetail", "gameCenterGroup", "leaderboards", "versions"],
    }
}

resource_family! {
    GameCenterActivityLocalizations {
        type: "gameCenterActivityLocalizations",
        path: "v1/gameCenterActivityLocalizations",
        attributes: Value,
        includes: ["image", "version"],
    }
}

resource_family! {
    GameCenterActivityVersionReleases {
        type: "gameCenterActivityVersionReleases",
        path: "v1/gameCenterActivityVersionReleases",
        attributes: Value,
        includes: ["version"],
    }
}

resource_family! {
    GameCenterChallenges {
        type: "gameCenterChallenges",
        path: "v1/gameCenterChallenges",
        attributes: Value,
        includes: ["gameCenterDetail", "gameCenterGroup", "leaderboard", "versions"],
    }
}

resource_family! {
    GameCenterChallengeLocalizations {
        type: "gameCenterChallengeLocalizations",
        path: "v1/gameCenterChallengeLocalizations",
        attributes: Value,
        includes: ["image", "version"],
    }
}

resource_family! {
    GameCenterMatchmakingQueues {
        type: "gameCenterMatchmakingQueues",
        path: "v1/gameCenterMatchmakingQueues",
        attributes: Value,
        includes: ["experimentRuleSet", "ruleSet"],
    }
}

resource_family! {
    GameCenterMatchmakingRuleSets {
        type: "gameCenterMatchmakingRuleSets",
        path: "v1/gameCenterMatchmakingRuleSets",
        attributes: Value,
        includes: ["matchmakingQueues", "rules", "teams"],
    }
}

resource_family! {
    GameCenterMatchmakingRules {
        type: "gameCenterMatchmakingRules",
        path: "v1/gameCenterMatchmakingRules",
        attributes: Value,
    }
}

resource_family! {
    GameCenterMatchmakingTeams {
        type: "gameCenterMatchmakingTeams",
        path: "v1/gameCenterMatchmakingTeams",
        attributes: Value,
    }
}

resource_family! {
    GameCenterAchievementImages {
        type: "gameCenterAchievementImages",
        path: "v1/gameCenterAchievementImages",
        attributes: ImageAssetAttributes,
    }
}

resource_family! {
    GameCenterLeaderboardImages {
        type: "gameCenterLeaderboardImages",
        path: "v1/gameCenterLeaderboardImages",
        attributes: ImageAssetAttributes,
    }
}

resource_family! {
    GameCenterLeaderboardSetImages {
        type: "gameCenterLeaderboardSetImages",
        path: "v1/gameCenterLeaderboardSetImages",
        attributes: ImageAssetAttributes,
    }
}

resource_family! {
    GameCenterActivityImages {
        type: "gameCenterActivityImages",
        path: "v1/gameCenterActivityImages",
        attributes: ImageAssetAttributes,
    }
}

resource_family! {
    GameCenterChallengeImages {
        type: "gameCenterChallengeImages",
        path: "v1/gameCenterChallengeImages",
        attributes: ImageAssetAttributes,
    }
}

/// Localizations that accept an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget {
    Achievement,
    Leaderboard,
    LeaderboardSet,
    Activity,
    Challenge,
}

impl ImageTarget {
    pub const ALL: [ImageTarget; 5] = [
        Self::Achievement,
        Self::Leaderboard,
        Self::LeaderboardSet,
        Self::Activity,
        Self::Challenge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Achievement => "achievement",
            Self::Leaderboard => "leaderboard",
            Self::LeaderboardSet => "leaderboard-set",
            Self::Activity => "activity",
            Self::Challenge => "challenge",
        }
    }

    /// Where the reservation is created and which relationship ties it to the localization.
    pub fn asset_target<'a>(&self, localization_id: &'a str) -> AssetTarget<'a> {
        let (type_tag, collection, relationship, parent_type) = match self {
            Self::Achievement => (
                GameCenterAchievementImages::TYPE,
                GameCenterAchievementImages::COLLECTION,
                "gameCenterAchievementLocalization",
                GameCenterAchievementLocalizations::TYPE,
            ),
            Self::Leaderboard => (
                GameCenterLeaderboardImages::TYPE,
                GameCenterLeaderboardImages::COLLECTION,
                "gameCenterLeaderboardLocalization",
                GameCenterLeaderboardLocalizations::TYPE,
            ),
            Self::LeaderboardSet => (
                GameCenterLeaderboardSetImages::TYPE,
                GameCenterLeaderboardSetImages::COLLECTION,
                "gameCenterLeaderboardSetLocalization",
                GameCenterLeaderboardSetLocalizations::TYPE,
            ),
            Self::Activity => (
                GameCenterActivityImages::TYPE,
                GameCenterActivityImages::COLLECTION,
                "localization",
                GameCenterActivityLocalizations::TYPE,
            ),
            Self::Challenge => (
                GameCenterChallengeImages::TYPE,
                GameCenterChallengeImages::COLLECTION,
                "localization",
                GameCenterChallengeLocalizations::TYPE,
            ),
        };
        AssetTarget {
            type_tag,
            collection,
            relationship,
            parent_type,
            parent_id: localization_id,
        }
    }
}

impl fmt::Display for ImageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageTarget {
    type Err = AscError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|target| target.name() == wanted)
            .ok_or_else(|| {
                AscError::InvalidArgument(format!(
                    "image target {s:?} must be one of: achievement, leaderboard, leaderboard-set, activity, challenge"
                ))
            })
    }
}

/// Matchmaking and detail metrics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    QueueSizes,
    QueueRequests,
    QueueSessions,
    BooleanRuleResults,
    NumberRuleResults,
    RuleErrors,
    ClassicMatchmakingRequests,
    RuleBasedMatchmakingRequests,
}

impl Metric {
    fn owner_collection(&self) -> &'static str {
        match self {
            Self::QueueSizes | Self::QueueRequests | Self::QueueSessions => {
                GameCenterMatchmakingQueues::COLLECTION
            }
            Self::BooleanRuleResults | Self::NumberRuleResults | Self::RuleErrors => {
                GameCenterMatchmakingRules::COLLECTION
            }
            Self::ClassicMatchmakingRequests | Self::RuleBasedMatchmakingRequests => {
                GameCenterDetails::COLLECTION
            }
        }
    }

    fn segment(&self) -> &'static str {
        match self {
            Self::QueueSizes => "matchmakingQueueSizes",
            Self::QueueRequests => "matchmakingRequests",
            Self::QueueSessions => "matchmakingSessions",
            Self::BooleanRuleResults => "matchmakingBooleanRuleResults",
            Self::NumberRuleResults => "matchmakingNumberRuleResults",
            Self::RuleErrors => "matchmakingRuleErrors",
            Self::ClassicMatchmakingRequests => "classicMatchmakingRequests",
            Self::RuleBasedMatchmakingRequests => "ruleBasedMatchmakingRequests",
        }
    }

    pub fn path(&self, owner_id: &str) -> Result<String> {
        Ok(format!(
            "{}/{}/metrics/{}",
            self.owner_collection(),
            required_id("metrics owner", owner_id)?,
            self.segment()
        ))
    }
}

/// Metrics pages: `data` holds data points grouped by dimension.
pub type MetricsResponse = Document<Vec<Value>>;

impl AppStoreConnectClient {
    pub async fn game_center_metrics(
        &self,
        ctx: &CallContext,
        metric: Metric,
        owner_id: &str,
        options: &MetricsOptions,
    ) -> Result<MetricsResponse> {
        let path = metric.path(owner_id)?;
        match options.target()? {
            ListTarget::Next(url) => self.do_next(ctx, &url).await,
            ListTarget::Query(query) => self.do_read(ctx, &path, &query).await,
        }
    }

    /// Reserves, transfers and commits an image for a Game Center localization.
    pub async fn upload_game_center_image(
        &self,
        ctx: &CallContext,
        target: ImageTarget,
        localization_id: &str,
        file: &Path,
    ) -> Result<UploadOutcome> {
        let localization_id = required_id("localization", localization_id)?;
        UploadCoordinator::new(self)
            .upload(ctx, &target.asset_target(localization_id), file)
            .await
    }
}
