//! 팬아웃 (피어별 동시 세션)
//!
//! 피어마다 독립 태스크에서 `TransferSession::run`을 실행한다.
//! 한 피어의 실패나 대체 전송 지연은 다른 피어에 영향을 주지 않는다.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::FailureKind;
use crate::message::Payload;
use crate::sender::{Outcome, TransferAttempt, TransferSession};
use crate::transport::Transport;

/// 방송 결과 (요청한 피어 순서대로 하나씩)
#[derive(Debug, Clone)]
pub struct FanoutReport {
    pub attempts: Vec<TransferAttempt>,
}

impl FanoutReport {
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, Outcome::Failed { .. }))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.attempts.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Peers: {} | Succeeded: {} | Failed: {}",
            self.attempts.len(),
            self.succeeded(),
            self.failed()
        )
    }
}

/// 진행 중인 방송
///
/// `snapshot`으로 중간 상태를 볼 수 있고(미종료 피어는 Pending),
/// `wait`으로 모든 피어의 종료를 기다린다.
pub struct BroadcastHandle {
    attempts: Arc<Mutex<Vec<TransferAttempt>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl BroadcastHandle {
    pub fn snapshot(&self) -> Vec<TransferAttempt> {
        self.attempts.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }

    /// 남은 세션 전부 취소 (진행 중인 연결은 future drop으로 닫힌다)
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    pub async fn wait(self) -> FanoutReport {
        let BroadcastHandle { attempts, tasks } = self;

        for (index, task) in tasks.into_iter().enumerate() {
            if let Err(e) = task.await {
                let mut attempts = attempts.lock();
                if let Some(attempt) = attempts.get_mut(index) {
                    if !attempt.is_terminal() {
                        warn!("[!] {} 세션 태스크 종료: {}", attempt.peer, e);
                        attempt.outcome = Outcome::Failed {
                            reason: format!("세션 태스크 종료: {e}"),
                            kind: FailureKind::Other,
                        };
                    }
                }
            }
        }

        let attempts = attempts.lock().clone();
        let report = FanoutReport { attempts };
        info!("[=] 방송 완료: {}", report.summary());
        report
    }
}

/// 팬아웃 코디네이터
pub struct FanoutCoordinator<P, F> {
    session: Arc<TransferSession<P, F>>,
}

impl<P, F> Clone for FanoutCoordinator<P, F> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<P, F> FanoutCoordinator<P, F>
where
    P: Transport + 'static,
    F: Transport + 'static,
{
    pub fn new(session: TransferSession<P, F>) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    pub fn session(&self) -> &TransferSession<P, F> {
        &self.session
    }

    /// 피어마다 세션 태스크 시작 후 즉시 반환
    pub fn spawn_broadcast(&self, payload: Payload, peers: &[String]) -> BroadcastHandle {
        let label = payload.label();
        let payload = Arc::new(payload);
        info!("[*] 방송 시작: '{}' -> {} 피어", label, peers.len());

        let attempts = Arc::new(Mutex::new(
            peers
                .iter()
                .map(|peer| TransferAttempt::new(label.clone(), peer.clone()))
                .collect::<Vec<_>>(),
        ));

        let tasks = peers
            .iter()
            .enumerate()
            .map(|(index, peer)| {
                let session = Arc::clone(&self.session);
                let payload = Arc::clone(&payload);
                let attempts = Arc::clone(&attempts);
                let peer = peer.clone();

                tokio::spawn(async move {
                    let attempt = session.run(&peer, &payload).await;
                    if let Some(slot) = attempts.lock().get_mut(index) {
                        *slot = attempt;
                    }
                })
            })
            .collect();

        BroadcastHandle { attempts, tasks }
    }

    /// 모든 피어가 종료될 때까지 대기
    pub async fn broadcast(&self, payload: Payload, peers: &[String]) -> FanoutReport {
        self.spawn_broadcast(payload, peers).wait().await
    }
}
