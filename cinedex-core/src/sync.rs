//! Player sync: make the downstream media player see what was published,
//! and verify that it did. Every mutation follows
//! Action -> Verification -> Completion; nothing is fire-and-forget.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cinedex_model::{Movie, PathMapping};

use crate::error::{CoreError, ErrorKind, Result};
use crate::providers::{ExternalPlayer, PlayerItem, PlayerQuery};

/// How often the fallback poll checks `is_scanning`.
const SCAN_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Cap on waiting for a directory-scoped scan.
const DIRECTORY_SCAN_CAP: Duration = Duration::from_secs(60);
/// Cap on waiting for a full-library scan.
const FULL_SCAN_CAP: Duration = Duration::from_secs(120);
/// Cap on waiting for a single-item refresh.
const REFRESH_CAP: Duration = Duration::from_secs(30);

/// A logical set of player instances sharing one library view. Instances
/// are tried in id order until one succeeds.
pub struct SyncGroup {
    pub name: String,
    /// Skip the group entirely while its only instance is playing.
    pub skip_active: bool,
    /// Rewrites library paths into the player's namespace.
    pub path_mapping: Option<PathMapping>,
    pub instances: Vec<Arc<dyn ExternalPlayer>>,
}

impl std::fmt::Debug for SyncGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGroup")
            .field("name", &self.name)
            .field("skip_active", &self.skip_active)
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Outcome per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Synced,
    SkippedActive,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(String, GroupOutcome)>,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| !matches!(outcome, GroupOutcome::Failed(_)))
    }
}

/// Drives every configured group through the sync scenarios.
pub struct PlayerSyncService {
    groups: Vec<SyncGroup>,
}

impl std::fmt::Debug for PlayerSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSyncService")
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl PlayerSyncService {
    pub fn new(groups: Vec<SyncGroup>) -> Self {
        Self { groups }
    }

    fn player_path(group: &SyncGroup, movie: &Movie) -> String {
        let dir = movie
            .deploy_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        match &group.path_mapping {
            Some(mapping) => mapping.apply(&dir).unwrap_or(dir),
            None => dir,
        }
    }

    /// Scenario 1: a newly published movie must appear in every group.
    pub async fn movie_published(&self, movie: &Movie) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for group in &self.groups {
            let outcome = self.publish_to_group(group, movie).await;
            report.outcomes.push((group.name.clone(), outcome));
        }
        if report.success() {
            Ok(report)
        } else {
            Err(CoreError::not_found(format!(
                "movie {} failed to appear in one or more player groups",
                movie.id
            )))
        }
    }

    async fn publish_to_group(&self, group: &SyncGroup, movie: &Movie) -> GroupOutcome {
        if group.skip_active && group.instances.len() == 1 {
            match group.instances[0].get_active_players().await {
                Ok(players) if !players.is_empty() => {
                    debug!(group = %group.name, "instance busy playing, skipping sync");
                    return GroupOutcome::SkippedActive;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(group = %group.name, error = %err, "active-player check failed");
                }
            }
        }

        let directory = Self::player_path(group, movie);
        let query = PlayerQuery::ExternalId(movie.external_ids.clone());

        // Fallback chain: first instance that verifies wins.
        let mut last_error = String::from("no instances configured");
        for instance in &group.instances {
            match self
                .scan_and_verify(instance.as_ref(), &directory, &query)
                .await
            {
                Ok(Some(item)) => {
                    info!(
                        group = %group.name,
                        instance = instance.instance_id(),
                        player_item = item.player_item_id,
                        "movie visible in player"
                    );
                    return GroupOutcome::Synced;
                }
                Ok(None) => {
                    last_error = "movie absent after directory and full scans".into();
                }
                Err(err) => {
                    warn!(
                        group = %group.name,
                        instance = instance.instance_id(),
                        error = %err,
                        "instance sync failed, trying next"
                    );
                    last_error = err.to_string();
                }
            }
        }
        GroupOutcome::Failed(last_error)
    }

    /// Directory-scoped scan, verify, then the full-scan fallback.
    async fn scan_and_verify(
        &self,
        player: &dyn ExternalPlayer,
        directory: &str,
        query: &PlayerQuery,
    ) -> Result<Option<PlayerItem>> {
        player.scan(directory).await?;
        wait_for_scan(player, DIRECTORY_SCAN_CAP).await?;

        if let Some(item) = player.find(query).await? {
            return Ok(Some(item));
        }

        debug!(directory, "movie missing after scoped scan, falling back to full scan");
        player.scan_all().await?;
        wait_for_scan(player, FULL_SCAN_CAP).await?;
        player.find(query).await
    }

    /// Scenario 2: a re-published movie is refreshed in place, falling back
    /// to scenario 1 when the player has never seen it.
    pub async fn movie_republished(&self, movie: &Movie) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut any_missing = false;

        for group in &self.groups {
            let mut outcome = GroupOutcome::Failed("no instances configured".into());
            for instance in &group.instances {
                match self.locate(instance.as_ref(), movie).await {
                    Ok(Some(item)) => {
                        match self.refresh_and_wait(instance.as_ref(), item.player_item_id).await {
                            Ok(()) => {
                                outcome = GroupOutcome::Synced;
                                break;
                            }
                            Err(err) => outcome = GroupOutcome::Failed(err.to_string()),
                        }
                    }
                    Ok(None) => {
                        any_missing = true;
                        outcome = GroupOutcome::Failed("unknown to player".into());
                    }
                    Err(err) => outcome = GroupOutcome::Failed(err.to_string()),
                }
            }
            report.outcomes.push((group.name.clone(), outcome));
        }

        if any_missing {
            // The player has never ingested it: run the publish scenario.
            debug!(movie_id = %movie.id, "republish fell back to the publish scenario");
            return self.movie_published(movie).await;
        }
        if report.success() {
            Ok(report)
        } else {
            Err(CoreError::new(
                ErrorKind::ProviderUnavailable,
                "refresh failed in one or more player groups",
            ))
        }
    }

    async fn refresh_and_wait(&self, player: &dyn ExternalPlayer, item_id: i64) -> Result<()> {
        player.refresh(item_id).await?;
        wait_for_scan(player, REFRESH_CAP).await
    }

    /// Scenario 3: a deleted movie must disappear from the players.
    pub async fn movie_deleted(&self, movie: &Movie) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for group in &self.groups {
            let mut outcome = GroupOutcome::Synced;
            for instance in &group.instances {
                match self.locate(instance.as_ref(), movie).await {
                    Ok(Some(item)) => {
                        if let Err(err) = instance.remove(item.player_item_id).await {
                            outcome = GroupOutcome::Failed(err.to_string());
                            continue;
                        }
                        // Verify: re-fetching must now miss.
                        match instance.get_item(item.player_item_id).await {
                            Ok(None) => {}
                            Ok(Some(_)) => {
                                outcome = GroupOutcome::Failed(
                                    "item still present after remove".into(),
                                );
                            }
                            Err(err) if err.kind == ErrorKind::NotFound => {}
                            Err(err) => outcome = GroupOutcome::Failed(err.to_string()),
                        }
                    }
                    Ok(None) => {}
                    Err(err) => outcome = GroupOutcome::Failed(err.to_string()),
                }
            }
            report.outcomes.push((group.name.clone(), outcome));
        }
        if report.success() {
            Ok(report)
        } else {
            Err(CoreError::new(
                ErrorKind::ProviderUnavailable,
                "removal failed in one or more player groups",
            ))
        }
    }

    /// Locate the player's internal id: by external id first, then by
    /// path, then by title + year.
    async fn locate(
        &self,
        player: &dyn ExternalPlayer,
        movie: &Movie,
    ) -> Result<Option<PlayerItem>> {
        if !movie.external_ids.is_empty() {
            if let Some(item) = player
                .find(&PlayerQuery::ExternalId(movie.external_ids.clone()))
                .await?
            {
                return Ok(Some(item));
            }
        }
        if let Some(dir) = movie.deploy_dir() {
            if let Some(item) = player
                .find(&PlayerQuery::Path(dir.to_string_lossy().into_owned()))
                .await?
            {
                return Ok(Some(item));
            }
        }
        if let (Some(title), Some(year)) = (movie.title.clone(), movie.year) {
            return player.find(&PlayerQuery::TitleYear { title, year }).await;
        }
        Ok(None)
    }
}

/// Wait for the player to finish scanning: push event when the instance
/// streams one, else a 2-second poll, both bounded by `cap`.
pub async fn wait_for_scan(player: &dyn ExternalPlayer, cap: Duration) -> Result<()> {
    if let Some(mut events) = player.scan_finished_events() {
        return match tokio::time::timeout(cap, events.recv()).await {
            Ok(Ok(())) => Ok(()),
            // A lagged or closed channel degrades to polling.
            Ok(Err(_)) => poll_until_idle(player, cap).await,
            Err(_) => Err(CoreError::timeout("scan completion event not received")),
        };
    }
    poll_until_idle(player, cap).await
}

async fn poll_until_idle(player: &dyn ExternalPlayer, cap: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + cap;
    loop {
        if !player.is_scanning().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::timeout("player scan did not finish in time"));
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockExternalPlayer;
    use chrono::Utc;
    use cinedex_model::{ExternalIds, FieldLocks, LibraryId, MovieId, WorkflowState};
    use std::path::PathBuf;

    fn movie() -> Movie {
        Movie {
            id: MovieId(1),
            library_id: LibraryId(1),
            external_ids: ExternalIds {
                tmdb_id: Some(27205),
                imdb_id: Some("tt1375666".into()),
                tvdb_id: None,
            },
            title: Some("Inception".into()),
            original_title: None,
            sort_title: None,
            year: Some(2010),
            plot: None,
            tagline: None,
            runtime: None,
            content_rating: None,
            release_date: None,
            popularity: None,
            budget: None,
            revenue: None,
            language: None,
            status: None,
            ratings: vec![],
            file_path: PathBuf::from("/media/m/Inception (2010)/Inception.mkv"),
            locks: FieldLocks::default(),
            locked_asset_kinds: vec![],
            state: WorkflowState::Published,
            monitored: true,
            nfo_parsed_at: None,
            last_enriched_at: None,
            published_at: None,
            published_nfo_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item() -> PlayerItem {
        PlayerItem {
            player_item_id: 99,
            title: "Inception".into(),
            year: Some(2010),
            path: Some("/media/m/Inception (2010)".into()),
        }
    }

    fn group(player: MockExternalPlayer) -> SyncGroup {
        SyncGroup {
            name: "living-room".into(),
            skip_active: false,
            path_mapping: None,
            instances: vec![Arc::new(player)],
        }
    }

    #[tokio::test]
    async fn published_movie_verifies_after_directory_scan() {
        let mut player = MockExternalPlayer::new();
        player.expect_scan().times(1).returning(|_| Ok(()));
        player.expect_is_scanning().returning(|| Ok(false));
        player.expect_scan_finished_events().returning(|| None);
        player.expect_find().times(1).returning(|_| Ok(Some(item())));

        let service = PlayerSyncService::new(vec![group(player)]);
        let report = service.movie_published(&movie()).await.unwrap();
        assert_eq!(report.outcomes[0].1, GroupOutcome::Synced);
    }

    #[tokio::test]
    async fn missing_movie_falls_back_to_full_scan_then_succeeds() {
        // Scoped scan finds nothing; the full-library fallback does.
        let mut player = MockExternalPlayer::new();
        player.expect_scan().times(1).returning(|_| Ok(()));
        player.expect_scan_all().times(1).returning(|| Ok(()));
        player.expect_is_scanning().returning(|| Ok(false));
        player.expect_scan_finished_events().returning(|| None);
        let mut found = false;
        player.expect_find().times(2).returning(move |_| {
            if found {
                Ok(Some(item()))
            } else {
                found = true;
                Ok(None)
            }
        });

        let service = PlayerSyncService::new(vec![group(player)]);
        let report = service.movie_published(&movie()).await.unwrap();
        assert_eq!(report.outcomes[0].1, GroupOutcome::Synced);
    }

    #[tokio::test]
    async fn absent_after_full_scan_is_a_failure() {
        let mut player = MockExternalPlayer::new();
        player.expect_scan().returning(|_| Ok(()));
        player.expect_scan_all().returning(|| Ok(()));
        player.expect_is_scanning().returning(|| Ok(false));
        player.expect_scan_finished_events().returning(|| None);
        player.expect_find().returning(|_| Ok(None));

        let service = PlayerSyncService::new(vec![group(player)]);
        let err = service.movie_published(&movie()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn skip_active_skips_a_busy_single_instance_group() {
        let mut player = MockExternalPlayer::new();
        player.expect_get_active_players().times(1).returning(|| {
            Ok(vec![crate::providers::ActivePlayer {
                kind: "video".into(),
            }])
        });
        // No scan may happen on a busy instance.
        player.expect_scan().times(0);

        let mut group = group(player);
        group.skip_active = true;
        let service = PlayerSyncService::new(vec![group]);
        let report = service.movie_published(&movie()).await.unwrap();
        assert_eq!(report.outcomes[0].1, GroupOutcome::SkippedActive);
    }

    #[tokio::test]
    async fn deletion_verifies_the_item_is_gone() {
        let mut player = MockExternalPlayer::new();
        player.expect_find().times(1).returning(|_| Ok(Some(item())));
        player.expect_remove().times(1).returning(|_| Ok(()));
        player.expect_get_item().times(1).returning(|_| Ok(None));

        let service = PlayerSyncService::new(vec![group(player)]);
        let report = service.movie_deleted(&movie()).await.unwrap();
        assert!(report.success());
    }

    #[tokio::test]
    async fn deletion_fails_when_the_item_survives() {
        let mut player = MockExternalPlayer::new();
        player.expect_find().times(1).returning(|_| Ok(Some(item())));
        player.expect_remove().times(1).returning(|_| Ok(()));
        player.expect_get_item().times(1).returning(|_| Ok(Some(item())));

        let service = PlayerSyncService::new(vec![group(player)]);
        assert!(service.movie_deleted(&movie()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_wait_times_out_when_the_player_never_settles() {
        let mut player = MockExternalPlayer::new();
        player.expect_scan_finished_events().returning(|| None);
        player.expect_is_scanning().returning(|| Ok(true));

        let err = wait_for_scan(&player, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }
}
