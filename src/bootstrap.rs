//! Process composition root: one manager per enabled region, updater jobs
//! on the shared cron scheduler. Created once at startup and passed by
//! reference; no ambient globals.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::RegionManager;
use crate::config::Config;
use crate::region::Region;
use crate::scheduler::UpdaterScheduler;
use crate::updater::{AppHashUpdater, GitPusher};

pub struct AppState {
    pub config: Config,
    pub managers: HashMap<Region, Arc<RegionManager>>
}

impl AppState {
    /// Build and start everything the core owns. A region whose manager
    /// fails to initialize is still registered: its pool stays empty and
    /// requests answer with the failure envelope until a restart.
    pub fn init(config: Config) -> anyhow::Result<Self> {
        let git = config.git.enabled.then(|| GitPusher::new(
            &config.git.username,
            &config.git.email,
            &config.git.password,
            config.proxy().map(str::to_string)
        ));

        let proxy = config.proxy().map(str::to_string);

        let mut managers = HashMap::new();

        for (&region, server_config) in &config.servers {
            if !server_config.enabled {
                continue;
            }

            let mut manager = RegionManager::new(
                region,
                server_config.clone(),
                config.asset_updater_servers.clone(),
                git.clone(),
                proxy.clone(),
                &config.jp_sekai_cookie_url
            );

            if let Err(err) = manager.init() {
                tracing::error!("{} manager failed to initialize: {err:#}", region.tag());
            }

            managers.insert(region, Arc::new(manager));
        }

        let mut scheduler = UpdaterScheduler::new();

        for (&region, server_config) in &config.servers {
            if !server_config.enabled {
                continue;
            }

            if server_config.enable_master_updater && !server_config.master_updater_cron.is_empty() {
                if let Some(manager) = managers.get(&region).cloned() {
                    scheduler.register(
                        format!("{} sekai updater", region.tag()),
                        &server_config.master_updater_cron,
                        move || manager.check_master_update()
                    )?;
                }
            }

            if server_config.enable_app_hash_updater && !server_config.app_hash_updater_cron.is_empty() {
                let updater = AppHashUpdater::new(
                    config.apphash_sources.clone(),
                    region,
                    &server_config.version_path
                )?;

                scheduler.register(
                    format!("{} apphash updater", region.tag()),
                    &server_config.app_hash_updater_cron,
                    move || updater.check_app_version()
                )?;
            }
        }

        scheduler.start();

        Ok(Self {
            config,
            managers
        })
    }

    pub fn manager(&self, region: Region) -> Option<&Arc<RegionManager>> {
        self.managers.get(&region)
    }
}
