use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, ManualClock};
use crate::config::QueueOptions;
use crate::dead_letter::DeadMessageHandler;
use crate::error::{StorageError, StorageResult};
use crate::event::{EventSink, QueueEvent};
use crate::fingerprint::fingerprint;
use crate::message::Message;
use crate::storage::{
    LeaseOutcome, LeaseRequest, MemoryStore, Store, StoreCounts, StoreOp,
};

use super::{Queue, QueueState, Sweeper};

mod common;
mod poll;

use common::*;
