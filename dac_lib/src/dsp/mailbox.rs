//! DSP -> CPU mailbox

use std::collections::VecDeque;

/// Push-only view of the DSP -> CPU mailbox. Ordering is significant: the CPU side consumes mails
/// in FIFO order.
pub trait MailSink {
    /// Queue `mail` for the CPU. If `interrupt` is true the DSP interrupt is raised once the mail
    /// becomes visible.
    fn push_mail(&mut self, mail: u32, interrupt: bool);

    /// True if some mails haven't been read by the CPU yet
    fn has_pending(&self) -> bool;

    /// Raise the DSP interrupt without sending any mail
    fn raise_interrupt(&mut self);
}

/// Mail as seen by the CPU
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mail {
    pub value: u32,
    pub interrupt: bool,
}

/// Simple in-order mailbox
#[derive(serde::Serialize, serde::Deserialize, Default)]
pub struct MailQueue {
    queue: VecDeque<Mail>,
    /// Number of interrupts raised, with or without a mail
    interrupts: u32,
}

impl MailQueue {
    pub fn new() -> MailQueue {
        MailQueue {
            queue: VecDeque::new(),
            interrupts: 0,
        }
    }

    /// Read the next mail
    pub fn pop(&mut self) -> Option<Mail> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn interrupts(&self) -> u32 {
        self.interrupts
    }

    /// Drain every pending mail value, dropping the interrupt flags
    pub fn drain_values(&mut self) -> Vec<u32> {
        self.queue.drain(..).map(|m| m.value).collect()
    }
}

impl MailSink for MailQueue {
    fn push_mail(&mut self, mail: u32, interrupt: bool) {
        #[cfg(feature = "mail_verbose")]
        debug!("DSP -> CPU mail {:08x} (interrupt: {})", mail, interrupt);

        if interrupt {
            self.interrupts += 1;
        }

        self.queue.push_back(Mail {
            value: mail,
            interrupt,
        });
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    fn raise_interrupt(&mut self) {
        self.interrupts += 1;
    }
}

#[test]
fn mail_queue_order() {
    let mut mq = MailQueue::new();

    assert!(!mq.has_pending());

    mq.push_mail(0xdcd1_0004, true);
    mq.push_mail(0xf355_ff00, false);
    mq.raise_interrupt();

    assert!(mq.has_pending());
    assert_eq!(mq.len(), 2);
    assert_eq!(mq.interrupts(), 2);

    assert_eq!(
        mq.pop(),
        Some(Mail {
            value: 0xdcd1_0004,
            interrupt: true
        })
    );
    assert_eq!(mq.drain_values(), vec![0xf355_ff00]);
    assert!(mq.is_empty());
}
