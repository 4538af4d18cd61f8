//! 完成契约：单次结算的 resolve/reject 能力，以及调用方侧等待结果的 [`PendingInvocation`]。
//!
//! # 模块定位（Why）
//! - 导出方法可能在返回后才完成实际工作（交给宿主运行时、后台线程等），结果必须经由一个
//!   “只能结算一次”的能力对象送达远端；
//! - 分发器为每次调用创建一对 [`Completion`] / [`PendingInvocation`]，前者交给方法处理器，
//!   后者返回给调用方。
//!
//! # 状态机（What）
//! - `Pending → Resolved | Rejected`，终态吸收，不存在回到 `Pending` 的路径；
//! - 状态字通过一次 compare-exchange 推进，竞争失败的一方不会产生任何可观测的结算；
//! - 所有 `Completion` 句柄在 `Pending` 状态下被丢弃时，等待方得到
//!   “completion contract dropped before settling” 的 `ExecutionFailed`。
//!
//! # 风险提示（Trade-offs）
//! - 调用方提前丢弃 [`PendingInvocation`] 后，结算仍然成功推进状态机，结果被静默丢弃；
//!   桥接层不提供取消语义。

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context as TaskContext, Poll},
};

use futures::{channel::oneshot, future::FusedFuture};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::SettleViolationPolicy,
    error::{BridgeError, MethodFault},
    observability::COMPLETION_TARGET,
};

type Outcome = Result<Value, MethodFault>;

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const REJECTED: u8 = 2;

/// 单次调用的结算状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionState {
    Pending,
    Resolved,
    Rejected,
}

impl CompletionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RESOLVED => CompletionState::Resolved,
            REJECTED => CompletionState::Rejected,
            _ => CompletionState::Pending,
        }
    }

    /// 是否已进入终态。
    pub fn is_terminal(self) -> bool {
        !matches!(self, CompletionState::Pending)
    }
}

struct Shared {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
    module: Arc<str>,
    method: Arc<str>,
    policy: SettleViolationPolicy,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if *self.state.get_mut() == PENDING {
            warn!(
                target: COMPLETION_TARGET,
                module = %self.module,
                method = %self.method,
                "completion contract dropped before settling"
            );
        }
    }
}

/// 完成契约。
///
/// # 教案式说明
/// - **意图 (Why)**：把“结果只能送达一次”从调用约定提升为类型能力；处理器拿到的是唯一的结算入口，
///   无论在当前线程立即结算，还是移动到其他线程稍后结算，都遵循同一套原子状态机；
/// - **契约 (What)**：
///   - [`resolve`](Self::resolve) / [`reject`](Self::reject) 至多有一次生效，返回值表示本次调用是否完成了结算；
///   - 失败的结算按 [`SettleViolationPolicy`] 报告，从不 panic；
///   - 类型满足 `Send + Sync`，可自由跨线程移动；
/// - **设计权衡 (Trade-offs)**：不对外实现 `Clone`，避免业务代码把结算权分散到多处；
///   分发器内部持有一个见证句柄，用于在同步故障时封存契约。
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// 创建一对完成契约与等待句柄。
    pub(crate) fn channel(
        module: Arc<str>,
        method: Arc<str>,
        policy: SettleViolationPolicy,
    ) -> (Completion, PendingInvocation) {
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(sender)),
            module: Arc::clone(&module),
            method: Arc::clone(&method),
            policy,
        });
        let pending = PendingInvocation {
            receiver: Some(receiver),
            module,
            method,
        };
        (Completion { shared }, pending)
    }

    /// 分发器内部的见证句柄，与处理器持有的契约共享同一状态。
    pub(crate) fn witness(&self) -> Completion {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 以成功值结算。
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(RESOLVED, Ok(value.into()))
    }

    /// 以可序列化的值结算；序列化失败时改为 reject。
    pub fn resolve_with<T>(&self, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(value) {
            Ok(value) => self.settle(RESOLVED, Ok(value)),
            Err(error) => self.settle(REJECTED, Err(MethodFault::from_error(error))),
        }
    }

    /// 以故障结算。
    pub fn reject(&self, fault: impl Into<MethodFault>) -> bool {
        self.settle(REJECTED, Err(fault.into()))
    }

    pub fn state(&self) -> CompletionState {
        CompletionState::from_raw(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_terminal()
    }

    /// 封存为 `Rejected` 但不投递结果：同步故障已由 `invoke` 直接返回，等待方不应再收到第二份结果。
    pub(crate) fn seal_rejected(&self) -> bool {
        if self.advance(REJECTED).is_err() {
            return false;
        }
        drop(self.shared.sender.lock().take());
        true
    }

    fn settle(&self, target: u8, outcome: Outcome) -> bool {
        match self.advance(target) {
            Ok(()) => {
                if let Some(sender) = self.shared.sender.lock().take() {
                    // 等待方已丢弃时结果无人接收，状态机仍已推进。
                    let _ = sender.send(outcome);
                }
                true
            }
            Err(current) => {
                self.report_violation(CompletionState::from_raw(target), current);
                false
            }
        }
    }

    fn advance(&self, target: u8) -> Result<(), CompletionState> {
        self.shared
            .state
            .compare_exchange(PENDING, target, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CompletionState::from_raw)
    }

    fn report_violation(&self, attempted: CompletionState, current: CompletionState) {
        if self.shared.policy == SettleViolationPolicy::Warn {
            warn!(
                target: COMPLETION_TARGET,
                module = %self.shared.module,
                method = %self.shared.method,
                ?attempted,
                ?current,
                "completion already settled; ignoring duplicate outcome"
            );
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("module", &self.shared.module)
            .field("method", &self.shared.method)
            .field("state", &self.state())
            .finish()
    }
}

/// 调用方侧的等待句柄，`await` 得到本次调用的最终结果。
///
/// - resolve 的值原样返回；
/// - reject 的故障包装为 [`BridgeError::ExecutionFailed`]；
/// - 契约未结算即被全部丢弃时同样返回 `ExecutionFailed`；
/// - 结果只交付一次：交付之后 [`try_outcome`](Self::try_outcome) 返回 `None`，
///   再次轮询保持 `Pending`（见 [`FusedFuture::is_terminated`]）。
#[derive(Debug)]
#[must_use = "the outcome of an invocation is only observable through its PendingInvocation"]
pub struct PendingInvocation {
    receiver: Option<oneshot::Receiver<Outcome>>,
    module: Arc<str>,
    method: Arc<str>,
}

impl PendingInvocation {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// 非阻塞地查看结果，尚未结算或结果已被取走时返回 `None`。
    pub fn try_outcome(&mut self) -> Option<Result<Value, BridgeError>> {
        let receiver = self.receiver.as_mut()?;
        let outcome = match receiver.try_recv() {
            Ok(Some(outcome)) => self.translate(outcome),
            Ok(None) => return None,
            Err(oneshot::Canceled) => Err(self.dropped()),
        };
        self.receiver = None;
        Some(outcome)
    }

    fn translate(&self, outcome: Outcome) -> Result<Value, BridgeError> {
        outcome.map_err(|fault| BridgeError::execution_failed(&self.module, &self.method, fault))
    }

    fn dropped(&self) -> BridgeError {
        BridgeError::execution_failed(
            &self.module,
            &self.method,
            MethodFault::new("completion contract dropped before settling"),
        )
    }
}

impl Future for PendingInvocation {
    type Output = Result<Value, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Pending;
        };
        let outcome = match Pin::new(receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => this.translate(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Err(this.dropped()),
        };
        this.receiver = None;
        Poll::Ready(outcome)
    }
}

impl FusedFuture for PendingInvocation {
    fn is_terminated(&self) -> bool {
        self.receiver.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use futures::executor::block_on;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    fn pair(policy: SettleViolationPolicy) -> (Completion, PendingInvocation) {
        Completion::channel(Arc::from("Example"), Arc::from("add"), policy)
    }

    #[test]
    fn first_resolve_wins_and_later_outcomes_are_ignored() {
        let (completion, pending) = pair(SettleViolationPolicy::Ignore);

        assert_eq!(completion.state(), CompletionState::Pending);
        assert!(completion.resolve(5));
        assert!(!completion.reject("too late"));
        assert!(!completion.resolve(6));
        assert_eq!(completion.state(), CompletionState::Resolved);

        assert_eq!(block_on(pending).expect("应得到首个结果"), json!(5));
    }

    #[test]
    fn reject_surfaces_as_execution_failed() {
        let (completion, pending) = pair(SettleViolationPolicy::Ignore);
        assert!(completion.reject(MethodFault::new("quota exceeded")));
        assert_eq!(completion.state(), CompletionState::Rejected);

        match block_on(pending) {
            Err(BridgeError::ExecutionFailed { module, method, fault }) => {
                assert_eq!(&*module, "Example");
                assert_eq!(&*method, "add");
                assert_eq!(fault.message(), "quota exceeded");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn settling_from_another_thread_wakes_the_waiter() {
        let (completion, pending) = pair(SettleViolationPolicy::Warn);
        let worker = thread::spawn(move || completion.resolve_with(&vec![1, 2, 3]));

        assert_eq!(block_on(pending).expect("应收到结果"), json!([1, 2, 3]));
        assert!(worker.join().expect("结算线程不应 panic"));
    }

    #[test]
    fn concurrent_settlers_produce_exactly_one_outcome() {
        let (completion, pending) = pair(SettleViolationPolicy::Ignore);
        let completion = Arc::new(completion);

        let winners: usize = (0..8)
            .map(|index| {
                let completion = Arc::clone(&completion);
                thread::spawn(move || {
                    if index % 2 == 0 {
                        completion.resolve(index)
                    } else {
                        completion.reject(format!("loser {index}"))
                    }
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().expect("结算线程不应 panic")))
            .sum();

        assert_eq!(winners, 1);
        assert!(completion.is_settled());
        let _ = block_on(pending);
    }

    #[test]
    fn dropping_an_unsettled_completion_fails_the_waiter() {
        let (completion, mut pending) = pair(SettleViolationPolicy::Ignore);
        assert!(pending.try_outcome().is_none());
        drop(completion);

        match pending.try_outcome() {
            Some(Err(BridgeError::ExecutionFailed { fault, .. })) => {
                assert_eq!(fault.message(), "completion contract dropped before settling");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn outcome_is_delivered_only_once() {
        let (completion, mut pending) = pair(SettleViolationPolicy::Ignore);
        assert_eq!(pending.module(), "Example");
        assert!(!pending.is_terminated());
        assert!(completion.resolve(5));
        drop(completion);

        assert_eq!(pending.try_outcome().map(Result::ok), Some(Some(json!(5))));
        assert!(pending.is_terminated());
        assert!(pending.try_outcome().is_none(), "结果已取走后不应再出现第二个结果");
        assert!(
            futures::FutureExt::now_or_never(&mut pending).is_none(),
            "终止后的轮询应保持 Pending"
        );
    }

    #[test]
    fn sealing_suppresses_delivery_and_later_settlement() {
        let (completion, mut pending) = pair(SettleViolationPolicy::Ignore);
        let witness = completion.witness();

        assert!(witness.seal_rejected());
        assert!(!completion.resolve(1));
        assert_eq!(completion.state(), CompletionState::Rejected);
        assert!(!witness.seal_rejected());

        // 封存后发送端已被丢弃，等待方只能观察到“未投递”。
        assert!(matches!(
            pending.try_outcome(),
            Some(Err(BridgeError::ExecutionFailed { .. }))
        ));
    }

    #[test]
    #[traced_test]
    fn duplicate_settlement_is_logged_under_warn_policy() {
        let (completion, _pending) = pair(SettleViolationPolicy::Warn);
        assert!(completion.resolve(true));
        assert!(!completion.reject("second"));

        assert!(logs_contain("completion already settled; ignoring duplicate outcome"));
    }

    #[test]
    #[traced_test]
    fn unsettled_drop_is_logged() {
        let (completion, _pending) = pair(SettleViolationPolicy::Warn);
        drop(completion);

        assert!(logs_contain("completion contract dropped before settling"));
    }
}
