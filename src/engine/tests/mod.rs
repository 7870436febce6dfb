use super::test_helpers::*;
use super::*;
use crate::error::{Error, TaskError};
use crate::types::{
    BatchSummary, ChannelEvent, CopyStatus, CorrelationKey, CreateStatus, ProgressEvent, ProvisionResult,
    SubscriptionState,
};
use std::time::Duration;

mod control;
