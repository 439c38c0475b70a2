use crate::error::{CleanError, CleanResult, Phase};

/// Single-owner buffer for one message per partition.
///
/// Only the coordinator holds an `Inbox`; workers reach it by sending over a channel. Each
/// partition may submit exactly once, and the contents are only released once every
/// partition has submitted.
#[derive(Debug)]
pub(crate) struct Inbox<T> {
    phase: Phase,
    slots: Vec<Option<T>>,
}

impl<T> Inbox<T> {
    pub(crate) fn new(partitions: usize, phase: Phase) -> Self {
        Self {
            phase,
            slots: std::iter::repeat_with(|| None).take(partitions).collect(),
        }
    }

    pub(crate) fn submit(&mut self, partition: usize, message: T) -> CleanResult<()> {
        let phase = self.phase;
        let slot = self.slots.get_mut(partition).ok_or_else(|| CleanError::Protocol {
            phase,
            message: format!("submission from unknown partition {partition}"),
        })?;
        if slot.is_some() {
            return Err(CleanError::Protocol {
                phase,
                message: format!("partition {partition} submitted twice"),
            });
        }
        *slot = Some(message);
        Ok(())
    }

    /// Messages in ascending partition order, once all partitions have submitted.
    pub(crate) fn into_complete(self) -> CleanResult<Vec<T>> {
        let phase = self.phase;
        let total = self.slots.len();
        self.slots
            .into_iter()
            .enumerate()
            .map(|(partition, slot)| {
                slot.ok_or_else(|| CleanError::Protocol {
                    phase,
                    message: format!("partition {partition} of {total} never submitted"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Inbox;
    use crate::error::{CleanError, Phase};

    #[test]
    fn releases_in_partition_order() {
        let mut inbox = Inbox::new(3, Phase::LocalStats);
        inbox.submit(2, "c").unwrap();
        inbox.submit(0, "a").unwrap();
        inbox.submit(1, "b").unwrap();
        assert_eq!(inbox.into_complete().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_second_submission() {
        let mut inbox = Inbox::new(2, Phase::Apply);
        inbox.submit(1, 10).unwrap();
        let err = inbox.submit(1, 11).unwrap_err();
        assert!(matches!(err, CleanError::Protocol { phase: Phase::Apply, .. }));
        assert!(err.to_string().contains("submitted twice"));
    }

    #[test]
    fn rejects_unknown_partition() {
        let mut inbox = Inbox::new(1, Phase::Apply);
        assert!(inbox.submit(4, ()).is_err());
    }

    #[test]
    fn incomplete_inbox_is_not_released() {
        let mut inbox = Inbox::new(2, Phase::LocalStats);
        inbox.submit(0, 1).unwrap();
        let err = inbox.into_complete().unwrap_err();
        assert!(err.to_string().contains("partition 1 of 2 never submitted"));
    }
}
