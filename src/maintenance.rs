/*
 *  maintenance.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Maintenance reminders - one email per elapsed service interval
 *  since install
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::remote::RemoteClient;

pub const MAINTENANCE_MESSAGE: &str = "This is a maintenance reminder";

/// How often the schedule is checked
pub const CHECK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Roughly six months
pub const DEFAULT_INTERVAL_SECS: u64 = 15_770_000;

/// 2023-08-15
pub const DEFAULT_INSTALL_DATE: i64 = 1_692_121_575;

/// Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    /// Install date, epoch seconds
    pub install_date: i64,
    /// Service interval in seconds
    pub interval_secs: u64,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            install_date: DEFAULT_INSTALL_DATE,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Reminders already sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceState {
    pub notified: u64,
}

impl MaintenanceSchedule {
    /// Whole intervals between install and `now`, zero before install.
    pub fn intervals_since_install(&self, now: i64) -> u64 {
        if self.interval_secs == 0 || now <= self.install_date {
            return 0;
        }
        (now - self.install_date) as u64 / self.interval_secs
    }

    /// Counts every interval that elapsed before we came up as handled.
    pub fn start(&self, now: i64) -> MaintenanceState {
        MaintenanceState { notified: self.intervals_since_install(now) }
    }

    /// True when a boundary has been crossed that nobody was told about.
    pub fn is_due(&self, state: MaintenanceState, now: i64) -> bool {
        state.notified < self.intervals_since_install(now)
    }

    /// One check: at most one reminder, the counter advances by one only
    /// once the reminder went out.
    pub async fn check(&self, state: MaintenanceState, remote: &dyn RemoteClient, now: i64) -> MaintenanceState {
        if !self.is_due(state, now) {
            debug!("maintenance: {} reminder(s) sent, none due", state.notified);
            return state;
        }
        match remote.send_notification_email(MAINTENANCE_MESSAGE).await {
            Ok(()) => {
                let notified = state.notified + 1;
                info!(
                    "maintenance: reminder {} sent ({} interval(s) since install)",
                    notified,
                    self.intervals_since_install(now)
                );
                MaintenanceState { notified }
            }
            Err(e) => {
                warn!("maintenance: reminder failed, will try next check: {}", e);
                state
            }
        }
    }
}

/// Marker sent by the ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceTick;

/// Posts a tick every `period`, first one a full period from now.
pub fn spawn_ticker<T>(period: Duration, evt_tx: Sender<T>) -> JoinHandle<()>
where
    T: From<MaintenanceTick> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if evt_tx.send(T::from(MaintenanceTick)).await.is_err() {
                debug!("maintenance ticker: receiver gone");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteCall};
    use tokio::sync::mpsc;

    const T: i64 = 1_000_000;
    const I: u64 = 1_000;

    fn schedule() -> MaintenanceSchedule {
        MaintenanceSchedule { install_date: T, interval_secs: I }
    }

    fn at(fraction: f64) -> i64 {
        T + (fraction * I as f64) as i64
    }

    #[test]
    fn test_intervals_since_install() {
        let s = schedule();
        assert_eq!(s.intervals_since_install(T - 5), 0);
        assert_eq!(s.intervals_since_install(T), 0);
        assert_eq!(s.intervals_since_install(at(0.99)), 0);
        assert_eq!(s.intervals_since_install(at(1.0)), 1);
        assert_eq!(s.intervals_since_install(at(2.5)), 2);

        let degenerate = MaintenanceSchedule { install_date: T, interval_secs: 0 };
        assert_eq!(degenerate.intervals_since_install(at(9.0)), 0);
    }

    #[tokio::test]
    async fn test_one_reminder_per_new_boundary() {
        let s = schedule();
        let remote = MemoryRemote::new();

        let state = s.start(at(2.5));
        assert_eq!(state.notified, 2);

        // nothing new yet
        let state = s.check(state, &remote, at(2.9)).await;
        assert_eq!(state.notified, 2);
        assert!(remote.take_calls().is_empty());

        let state = s.check(state, &remote, at(3.1)).await;
        assert_eq!(state.notified, 3);
        assert_eq!(remote.take_calls(), vec![RemoteCall::Email(MAINTENANCE_MESSAGE.into())]);

        // same boundary again
        let state = s.check(state, &remote, at(3.2)).await;
        assert_eq!(state.notified, 3);
        assert!(remote.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_one_per_check() {
        let s = schedule();
        let remote = MemoryRemote::new();
        let mut state = s.start(at(0.5));

        // offline across three boundaries
        for expected in 1..=3 {
            state = s.check(state, &remote, at(3.5)).await;
            assert_eq!(state.notified, expected);
        }
        state = s.check(state, &remote, at(3.5)).await;
        assert_eq!(state.notified, 3);
        assert_eq!(remote.take_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_waits_a_full_period() {
        let (tx, mut rx) = mpsc::channel::<MaintenanceTick>(4);
        let handle = spawn_ticker(CHECK_PERIOD, tx);

        time::sleep(CHECK_PERIOD - Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(MaintenanceTick));
        handle.abort();
    }
}
