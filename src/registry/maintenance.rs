use std::time::Instant;

use crate::game::game_phase::NotificationKind;
use crate::game::player::Role;
use crate::game::GameState;

use super::*;

/// The maintenance tick. Runs as one dedicated task; the phases always
/// execute in the same order and never overlap with a previous tick.
impl SessionRegistry {
    /// Drives the repeating tick until the process exits (or a fatal
    /// transport error surfaces).
    pub async fn run_maintenance(&self) -> Result<(), PeerError> {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            self.tick().await?;
        }
    }

    /// One full maintenance pass: health checks, deferred removals, game
    /// starts, queued outbound traffic, then matchmaking for idle peers.
    pub async fn tick(&self) -> Result<(), PeerError> {
        self.ping_peers().await?;
        self.remove_users().await?;
        self.attempt_start_games().await;
        self.send_stuff().await?;
        self.pick_games().await?;
        Ok(())
    }

    /// Health-checks every connected peer. Failures are queued for removal,
    /// never removed inline.
    async fn ping_peers(&self) -> Result<(), PeerError> {
        let dir = self.directory.lock().await;
        let mut failed = Vec::new();
        for user in dir.connected.values() {
            if !user.client.ping().await? {
                log::info!("{} missed a ping, flagging for removal", user.name);
                failed.push(user.addr.clone());
            }
        }
        drop(dir);

        if !failed.is_empty() {
            self.remove_queue.lock().unwrap().extend(failed);
        }
        Ok(())
    }

    /// Drains the deferred-removal queue: pops each flagged peer out of the
    /// directory, frees its name, detaches it from its game and tells the
    /// rest of that table. A member that fails the goodbye notice is itself
    /// appended to the queue, so cascades stay bounded by the directory.
    async fn remove_users(&self) -> Result<(), PeerError> {
        loop {
            let next = self.remove_queue.lock().unwrap().pop();
            let addr = match next {
                Some(addr) => addr,
                None => return Ok(()),
            };

            let mut dir = self.directory.lock().await;
            let user = match dir.connected.remove(&addr) {
                Some(user) => user,
                None => continue,
            };
            dir.names.remove(&user.name);
            dir.unused_names.insert(user.name.clone());
            log::info!("Say goodbye to {}", user.name);

            let game_id = match user.game {
                Some(game_id) => game_id,
                None => continue,
            };
            if let Some(game) = dir.games.get(&game_id) {
                // A departure can close out the phase on its own.
                game.lock().unwrap().remove_player(&user.name);
            }

            let mut failed = Vec::new();
            for member in dir.connected.values() {
                if member.game == Some(game_id) && !member.client.notify_leave(&user.name).await? {
                    failed.push(member.addr.clone());
                }
            }
            drop(dir);

            if !failed.is_empty() {
                self.remove_queue.lock().unwrap().extend(failed);
            }
        }
    }

    /// Starts every full roster, at most once per configured interval.
    async fn attempt_start_games(&self) {
        {
            let mut last = self.last_start_attempt.lock().unwrap();
            if last.elapsed() < self.config.start_interval {
                return;
            }
            *last = Instant::now();
        }

        let dir = self.directory.lock().await;
        for (game_id, game) in &dir.games {
            let mut game = game.lock().unwrap();
            if !game.is_started() && game.is_ready() {
                log::info!("Starting game {}", game_id);
                game.start();
            }
        }
    }

    /// Drains every game's outbound queues: notifications go to the whole
    /// table, action offers to the one player owed them; notification-first,
    /// alternating, until both run dry. A `GameStarts` notification also
    /// deals the role reveals; a `GameOver` one tears the game down and
    /// reports stats.
    async fn send_stuff(&self) -> Result<(), PeerError> {
        let mut dir = self.directory.lock().await;
        let game_ids: Vec<GameId> = dir.games.keys().copied().collect();

        for game_id in game_ids {
            let game = match dir.games.get(&game_id) {
                Some(game) => game.clone(),
                None => continue,
            };
            loop {
                let notification = game.lock().unwrap().take_notification();
                if let Some((kind, text)) = notification {
                    let members: Vec<(String, String)> = dir
                        .connected
                        .values()
                        .filter(|u| u.game == Some(game_id))
                        .map(|u| (u.addr.clone(), u.name.clone()))
                        .collect();

                    let mut failed = Vec::new();
                    for (addr, _) in &members {
                        if let Some(user) = dir.connected.get(addr) {
                            if !user.client.game_notify(kind, &text).await? {
                                failed.push(addr.clone());
                            }
                        }
                    }

                    match kind {
                        NotificationKind::GameStarts => {
                            for (addr, name) in &members {
                                let role = game.lock().unwrap().get_role(name);
                                let role = match role {
                                    Some(role) => role,
                                    None => continue,
                                };
                                if let Some(user) = dir.connected.get(addr) {
                                    if !user.client.send_role(role).await? {
                                        failed.push(addr.clone());
                                    }
                                }
                            }
                        }
                        NotificationKind::GameOver => {
                            let (won_by_mafia, elapsed) = {
                                let game = game.lock().unwrap();
                                (game.mafia_won(), game.elapsed().as_secs_f64())
                            };
                            log::info!("Game {} is over, mafia won: {}", game_id, won_by_mafia);
                            for (addr, name) in &members {
                                let won = match game.lock().unwrap().get_role(name) {
                                    Some(Role::Mafia) => won_by_mafia,
                                    Some(_) => !won_by_mafia,
                                    None => false,
                                };
                                self.stats.report_game_result(name, won, elapsed);
                                if let Some(user) = dir.connected.get_mut(addr) {
                                    user.game = None;
                                }
                            }
                            dir.games.remove(&game_id);
                        }
                        _ => {}
                    }

                    if !failed.is_empty() {
                        self.remove_queue.lock().unwrap().extend(failed);
                    }
                    if !dir.games.contains_key(&game_id) {
                        break;
                    }
                    continue;
                }

                let awaiting = game.lock().unwrap().take_awaiting_action();
                match awaiting {
                    Some(name) => {
                        let actions = game.lock().unwrap().actions(&name);
                        if actions.is_empty() {
                            // Dead or departed since being queued.
                            continue;
                        }
                        let addr = match dir.names.get(&name) {
                            Some(addr) => addr.clone(),
                            None => continue,
                        };
                        if let Some(user) = dir.connected.get(&addr) {
                            if user.game == Some(game_id)
                                && !user.client.give_action_options(&actions).await?
                            {
                                self.remove_queue.lock().unwrap().push(addr);
                            }
                        }
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Matches every game-less peer into the first session with a free
    /// seat, opening a new one when none has room. The newcomer learns the
    /// table, the table learns the newcomer.
    async fn pick_games(&self) -> Result<(), PeerError> {
        let mut dir = self.directory.lock().await;
        let idle: Vec<String> = dir
            .connected
            .values()
            .filter(|u| u.game.is_none())
            .map(|u| u.addr.clone())
            .collect();

        for addr in idle {
            let name = match dir.connected.get(&addr) {
                Some(user) => user.name.clone(),
                None => continue,
            };

            let mut chosen = None;
            for (game_id, game) in &dir.games {
                if game.lock().unwrap().add_player(&name) {
                    chosen = Some(*game_id);
                    break;
                }
            }
            let game_id = match chosen {
                Some(game_id) => game_id,
                None => {
                    let game_id = GameId(dir.next_game_id);
                    dir.next_game_id += 1;
                    let mut game = GameState::new();
                    game.add_player(&name);
                    dir.games.insert(game_id, Arc::new(StdMutex::new(game)));
                    game_id
                }
            };

            if let Some(user) = dir.connected.get_mut(&addr) {
                user.game = Some(game_id);
            }
            log::info!("Matched {} into game {}", name, game_id);

            let members = match dir.games.get(&game_id) {
                Some(game) => game.lock().unwrap().player_names(),
                None => continue,
            };

            let mut failed = Vec::new();
            if let Some(user) = dir.connected.get(&addr) {
                if !user.client.new_game(&members, game_id.0).await? {
                    failed.push(addr.clone());
                }
            }
            for member in &members {
                if member == &name {
                    continue;
                }
                let user = match dir.names.get(member).and_then(|a| dir.connected.get(a)) {
                    Some(user) => user,
                    None => continue,
                };
                if !user.client.notify_join(&name).await? {
                    failed.push(user.addr.clone());
                }
            }
            if !failed.is_empty() {
                self.remove_queue.lock().unwrap().extend(failed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::config::Config;
    use crate::game::game_phase::{Action, NotificationKind};
    use crate::registry::{RegisterReply, SessionRegistry};
    use crate::rpc::protocol::{PeerRequest, PeerResponse};

    /// In-process peer speaking the wire protocol, recording everything the
    /// server pushes at it.
    struct FakePeer {
        addr: String,
        received: Arc<StdMutex<Vec<PeerRequest>>>,
        accept_task: JoinHandle<()>,
    }

    impl FakePeer {
        async fn spawn() -> FakePeer {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            let received: Arc<StdMutex<Vec<PeerRequest>>> = Arc::new(StdMutex::new(Vec::new()));
            let log = received.clone();

            let accept_task = tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => break,
                    };
                    let log = log.clone();
                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut lines = BufReader::new(reader).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let request: PeerRequest = serde_json::from_str(&line).unwrap();
                            let response = match &request {
                                PeerRequest::Ping { payload } => PeerResponse::Pong {
                                    payload: payload.clone(),
                                },
                                _ => PeerResponse::Ack,
                            };
                            log.lock().unwrap().push(request);
                            let mut out = serde_json::to_string(&response).unwrap();
                            out.push('\n');
                            if writer.write_all(out.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            });

            FakePeer {
                addr,
                received,
                accept_task,
            }
        }

        fn received(&self) -> Vec<PeerRequest> {
            self.received.lock().unwrap().clone()
        }

        fn shutdown(&self) {
            self.accept_task.abort();
        }
    }

    fn test_registry() -> SessionRegistry {
        SessionRegistry::new(Config::for_tests())
    }

    async fn register_ok(registry: &SessionRegistry, peer: &FakePeer, name: &str) {
        match registry.register(&peer.addr, Some(name)).await {
            RegisterReply::Ok { name: assigned, .. } => assert_eq!(assigned, name),
            RegisterReply::AlreadyRegistered => panic!("fresh address was rejected"),
        }
    }

    #[tokio::test]
    async fn four_peers_are_matched_started_and_offered_actions() {
        let registry = test_registry();
        let mut peers = Vec::new();
        for i in 0..4 {
            let peer = FakePeer::spawn().await;
            register_ok(&registry, &peer, &format!("player{}", i)).await;
            peers.push(peer);
        }

        registry.tick().await.unwrap(); // everyone lands in the same fresh game
        registry.tick().await.unwrap(); // which is full, so it starts and drains

        for peer in &peers {
            let received = peer.received();
            assert!(received
                .iter()
                .any(|r| matches!(r, PeerRequest::NewGame { .. })));
            assert!(received.iter().any(|r| matches!(
                r,
                PeerRequest::GameNotify {
                    kind: NotificationKind::GameStarts,
                    ..
                }
            )));
            assert!(received
                .iter()
                .any(|r| matches!(r, PeerRequest::SendRole { .. })));
            assert!(received.iter().any(|r| matches!(
                r,
                PeerRequest::GameNotify {
                    kind: NotificationKind::ChangeState,
                    ..
                }
            )));
            assert!(received.iter().any(|r| matches!(
                r,
                PeerRequest::GiveActionOptions { actions } if actions.contains(&Action::Sleep)
            )));
        }

        // The first day has no lynch vote, so a vote is stale/illegal.
        let vote = Action::Vote("player1".to_string());
        assert!(!registry.take_action(&peers[0].addr, &vote).await);
        assert!(registry.take_action(&peers[0].addr, &Action::Sleep).await);
    }

    #[tokio::test]
    async fn dead_peers_are_evicted_and_their_table_is_told_once() {
        let registry = test_registry();
        let doomed = FakePeer::spawn().await;
        let survivor = FakePeer::spawn().await;
        register_ok(&registry, &doomed, "Doomed").await;
        register_ok(&registry, &survivor, "Survivor").await;

        registry.tick().await.unwrap(); // the two of them share a fresh game

        doomed.shutdown();
        registry.tick().await.unwrap(); // missed ping → deferred removal → eviction

        let leaves = survivor
            .received()
            .into_iter()
            .filter(|r| matches!(r, PeerRequest::NotifyLeave { name } if name == "Doomed"))
            .count();
        assert_eq!(leaves, 1);

        // The released name is free again for the next arrival.
        let third = FakePeer::spawn().await;
        match registry.register(&third.addr, Some("Doomed")).await {
            RegisterReply::Ok { name, users } => {
                assert_eq!(name, "Doomed");
                assert_eq!(users, vec!["Survivor".to_string()]);
            }
            RegisterReply::AlreadyRegistered => panic!("fresh address was rejected"),
        }
    }

    #[tokio::test]
    async fn explicit_leave_is_deferred_until_the_tick() {
        let registry = test_registry();
        let leaver = FakePeer::spawn().await;
        let stayer = FakePeer::spawn().await;
        register_ok(&registry, &leaver, "Leaver").await;
        register_ok(&registry, &stayer, "Stayer").await;
        registry.tick().await.unwrap();

        registry.leave(&leaver.addr);
        // Still registered until the maintenance pass runs.
        assert!(matches!(
            registry.register(&leaver.addr, None).await,
            RegisterReply::AlreadyRegistered
        ));

        registry.tick().await.unwrap();
        let leaves = stayer
            .received()
            .into_iter()
            .filter(|r| matches!(r, PeerRequest::NotifyLeave { name } if name == "Leaver"))
            .count();
        assert_eq!(leaves, 1);
    }

    #[tokio::test]
    async fn chat_fans_out_with_the_pregame_tag() {
        let registry = test_registry();
        let anna = FakePeer::spawn().await;
        let bert = FakePeer::spawn().await;
        register_ok(&registry, &anna, "Anna").await;
        register_ok(&registry, &bert, "Bert").await;
        registry.tick().await.unwrap();

        let notice = registry.relay_chat(&anna.addr, "hello table").await.unwrap();
        assert_eq!(notice, None);

        let expected = PeerRequest::Chat {
            from: "Anna".to_string(),
            tag: "(pre-game chat)".to_string(),
            text: "hello table".to_string(),
        };
        assert!(anna.received().contains(&expected));
        assert!(bert.received().contains(&expected));

        // Not matched into any game yet: only a notice comes back.
        let loner = FakePeer::spawn().await;
        register_ok(&registry, &loner, "Loner").await;
        let notice = registry.relay_chat(&loner.addr, "anyone?").await.unwrap();
        assert!(notice.is_some());
        assert!(loner.received().iter().all(|r| !matches!(r, PeerRequest::Chat { .. })));
    }

    #[tokio::test]
    async fn finished_members_are_requeued_into_a_fresh_game() {
        let registry = test_registry();
        let mut peers = Vec::new();
        for i in 0..4 {
            let peer = FakePeer::spawn().await;
            register_ok(&registry, &peer, &format!("player{}", i)).await;
            peers.push(peer);
        }
        registry.tick().await.unwrap();
        registry.tick().await.unwrap();

        // Walk the game to a mafia win: nobody ever lynches, the mafia
        // kills a victim every night.
        for _ in 0..8 {
            for peer in &peers {
                let offers: Vec<Action> = peer
                    .received()
                    .into_iter()
                    .rev()
                    .find_map(|r| match r {
                        PeerRequest::GiveActionOptions { actions } => Some(actions),
                        _ => None,
                    })
                    .unwrap_or_default();
                if let Some(kill) = offers.iter().find(|a| matches!(a, Action::Kill(_))) {
                    registry.take_action(&peer.addr, kill).await;
                }
                if offers.contains(&Action::Sleep) {
                    registry.take_action(&peer.addr, &Action::Sleep).await;
                } else if offers.contains(&Action::Wake) {
                    registry.take_action(&peer.addr, &Action::Wake).await;
                }
            }
            registry.tick().await.unwrap();
        }

        let game_over_seen = peers.iter().any(|peer| {
            peer.received().iter().any(|r| {
                matches!(
                    r,
                    PeerRequest::GameNotify {
                        kind: NotificationKind::GameOver,
                        ..
                    }
                )
            })
        });
        assert!(game_over_seen);

        // Survivors were detached and matched into a brand-new game.
        let new_games = peers
            .iter()
            .flat_map(|peer| peer.received())
            .filter(|r| matches!(r, PeerRequest::NewGame { game_id, .. } if *game_id > 1))
            .count();
        assert!(new_games > 0);
    }
}
