use super::*;

/// 出站事件日志：只追加；客户端断开后写入被静默丢弃。
#[derive(Clone)]
pub(super) struct EventEmitter {
    queue: mpsc::Sender<StreamEvent>,
    closed: Arc<AtomicBool>,
}

impl EventEmitter {
    pub(super) fn new(queue: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            queue,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    pub(super) async fn emit(&self, event: StreamEvent) {
        if self.is_closed() {
            return;
        }
        if self.queue.send(event).await.is_err() {
            self.closed.store(true, AtomicOrdering::SeqCst);
        }
    }

    pub(super) async fn finish(&self) {
        self.emit(StreamEvent::Done).await;
    }
}
