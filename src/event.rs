// MIT License - Copyright (c) 2026 Peter Wright
// Status notifications

use std::sync::Arc;

use crate::category::Category;
use crate::router::{NotificationRouter, Subscription};
use crate::store::Snapshot;

/// A full-category snapshot, as broadcast to observers after every push.
///
/// `seq` increases by one with every replacement of the category's slot;
/// 0 is the empty snapshot the store starts with.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub category: Category,
    pub seq: u64,
    pub snapshot: Arc<Snapshot>,
}

/// Router carrying status updates, one topic per category.
pub type StatusRouter = NotificationRouter<Category, StatusUpdate>;

/// An observer's feed of status updates for one category.
pub type StatusFeed = Subscription<Category, StatusUpdate>;
