//! Reference resolution.
//!
//! Given freshly observed events, the [`Enricher`] works out what they point
//! at but do not contain: author profiles, reposted originals, inline
//! mentions, and reactions. Missing data is fetched with a few batched
//! secondary queries; data already known to this process is never
//! re-fetched.

use crate::config::SyncConfig;
use crate::message::Filter;
use crate::notify::Notifier;
use crate::pool::RelayPool;
use crate::query::QueryExecutor;
use crate::reactions::ReactionIndex;
use crate::relay::RelayLink;
use futures::future::join_all;
use nostr::{
    Event, EventCodec, Kind, Mention, Profile, embedded_event, mentions, reposted_event_id,
};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Profile versions a relay may return per author before the rest are cut.
const PROFILE_VERSIONS_PER_AUTHOR: usize = 4;

/// Output of one enrichment pass.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    /// Primary events, embedded repost originals, then fetched references
    pub events: Vec<Event>,
    /// Profiles resolved in this pass
    pub profiles: HashMap<String, Profile>,
    /// Reactions newly indexed in this pass, by target id
    pub reactions: HashMap<String, Vec<Event>>,
}

/// What a batch of events refers to.
#[derive(Debug, Default)]
struct ReferencePlan {
    pubkeys: BTreeSet<String>,
    missing_ids: BTreeSet<String>,
    embedded: Vec<Event>,
    touched_ids: BTreeSet<String>,
    reactions: Vec<Event>,
}

/// Shared reference resolver. Cheap to clone; clones share the caches.
#[derive(Clone)]
pub struct Enricher {
    inner: Arc<EnricherInner>,
}

struct EnricherInner {
    pool: Arc<RelayPool>,
    executor: QueryExecutor,
    codec: Arc<dyn EventCodec>,
    notifier: Notifier,
    reactions: ReactionIndex,
    profiles: RwLock<HashMap<String, Profile>>,
    known_events: RwLock<HashSet<String>>,
    fanout_batch_size: usize,
    reaction_limit: usize,
}

impl Enricher {
    pub fn new(
        pool: Arc<RelayPool>,
        executor: QueryExecutor,
        reactions: ReactionIndex,
        config: &SyncConfig,
    ) -> Self {
        let codec = pool.codec();
        let notifier = pool.notifier().clone();
        Self {
            inner: Arc::new(EnricherInner {
                pool,
                executor,
                codec,
                notifier,
                reactions,
                profiles: RwLock::new(HashMap::new()),
                known_events: RwLock::new(HashSet::new()),
                fanout_batch_size: config.fanout_batch_size.max(1),
                reaction_limit: config.reaction_limit,
            }),
        }
    }

    /// Cached profile for `pubkey`.
    pub fn profile(&self, pubkey: &str) -> Option<Profile> {
        self.inner.profiles.read().get(pubkey).cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.inner.profiles.read().len()
    }

    /// Whether an event with this id was already delivered by some pass.
    pub fn is_known(&self, event_id: &str) -> bool {
        self.inner.known_events.read().contains(event_id)
    }

    pub fn reactions(&self) -> &ReactionIndex {
        &self.inner.reactions
    }

    /// Resolve everything `primary` refers to.
    ///
    /// Note and profile fetches run concurrently; the reaction fetch runs
    /// once the set of touched event ids is complete. Fetches whose id or
    /// pubkey set turns out empty are never issued.
    pub async fn enrich(&self, primary: &[Event]) -> Enrichment {
        let relays = self.inner.pool.usable_links().await;
        let plan = self.plan(primary);
        debug!(
            "Enriching {} events: {} profiles, {} missing events, {} embedded reposts",
            primary.len(),
            plan.pubkeys.len(),
            plan.missing_ids.len(),
            plan.embedded.len()
        );

        let (fetched, mut profiles) = futures::join!(
            self.fetch_events(&plan.missing_ids, &relays),
            self.fetch_profiles(&plan.pubkeys, &relays),
        );

        // Authors of fetched originals were unknown until now
        let late_authors: BTreeSet<String> = fetched
            .iter()
            .map(|e| e.pubkey.clone())
            .filter(|pk| !plan.pubkeys.contains(pk) && !self.has_profile(pk))
            .collect();
        profiles.extend(self.fetch_profiles(&late_authors, &relays).await);

        let mut touched = plan.touched_ids;
        touched.extend(fetched.iter().map(|e| e.id.clone()));
        let mut reactions = self.inner.reactions.merge(plan.reactions);
        for (target, added) in self.fetch_reactions(&touched, &relays).await {
            reactions.entry(target).or_default().extend(added);
        }

        let mut events: Vec<Event> = Vec::with_capacity(primary.len() + fetched.len());
        let mut delivered = HashSet::new();
        for event in primary.iter().chain(&plan.embedded).chain(&fetched) {
            if delivered.insert(event.id.clone()) {
                events.push(event.clone());
            }
        }
        self.inner.known_events.write().extend(delivered);

        if !profiles.is_empty() {
            self.inner.notifier.profiles_resolved(profiles.clone());
        }
        if !reactions.is_empty() {
            self.inner.notifier.reactions_updated(reactions.clone());
        }

        Enrichment {
            events,
            profiles,
            reactions,
        }
    }

    fn plan(&self, primary: &[Event]) -> ReferencePlan {
        let mut plan = ReferencePlan::default();
        let local_ids: HashSet<&str> = primary.iter().map(|e| e.id.as_str()).collect();

        for event in primary {
            if event.kind_type() == Kind::Reaction {
                plan.reactions.push(event.clone());
                continue;
            }

            plan.touched_ids.insert(event.id.clone());
            plan.pubkeys.insert(event.pubkey.clone());
            plan.pubkeys
                .extend(event.tag_values("p").map(str::to_string));

            if event.kind_type() == Kind::Repost {
                match embedded_event(event, self.inner.codec.as_ref()) {
                    Some(original) => {
                        plan.pubkeys.insert(original.pubkey.clone());
                        plan.touched_ids.insert(original.id.clone());
                        plan.embedded.push(original);
                    }
                    None => {
                        if let Some(id) = reposted_event_id(event) {
                            plan.missing_ids.insert(id.to_string());
                        }
                    }
                }
            }

            for mention in mentions(event) {
                match mention {
                    Mention::Event(id) => {
                        plan.missing_ids.insert(id);
                    }
                    Mention::Profile(pubkey) => {
                        plan.pubkeys.insert(pubkey);
                    }
                }
            }
        }

        let embedded_ids: HashSet<&str> = plan.embedded.iter().map(|e| e.id.as_str()).collect();
        let known = self.inner.known_events.read();
        plan.missing_ids.retain(|id| {
            !local_ids.contains(id.as_str())
                && !embedded_ids.contains(id.as_str())
                && !known.contains(id)
        });
        drop(known);

        let profiles = self.inner.profiles.read();
        plan.pubkeys.retain(|pk| !profiles.contains_key(pk));
        drop(profiles);

        plan
    }

    fn has_profile(&self, pubkey: &str) -> bool {
        self.inner.profiles.read().contains_key(pubkey)
    }

    /// One filter per chunk of `values`, skipping chunks with no identity scope.
    fn chunk_filters(
        &self,
        values: &BTreeSet<String>,
        build: impl Fn(Vec<String>) -> Filter,
    ) -> Vec<Filter> {
        let values: Vec<String> = values.iter().cloned().collect();
        values
            .chunks(self.inner.fanout_batch_size)
            .map(|chunk| build(chunk.to_vec()))
            .filter(Filter::has_identity_scope)
            .collect()
    }

    /// Run one query per chunk of `values`, all concurrently.
    async fn fetch_chunked(
        &self,
        values: &BTreeSet<String>,
        relays: &[RelayLink],
        build: impl Fn(Vec<String>) -> Filter,
    ) -> Vec<Event> {
        if values.is_empty() || relays.is_empty() {
            return Vec::new();
        }

        let filters = self.chunk_filters(values, build);
        join_all(
            filters
                .iter()
                .map(|filter| self.inner.executor.run(filter, relays)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    async fn fetch_events(&self, ids: &BTreeSet<String>, relays: &[RelayLink]) -> Vec<Event> {
        let events = self
            .fetch_chunked(ids, relays, |chunk| {
                let limit = chunk.len() as u64;
                Filter::new().ids(chunk).kinds(vec![Kind::Note.as_u16()]).limit(limit)
            })
            .await;

        let mut seen = HashSet::new();
        events
            .into_iter()
            .filter(|e| ids.contains(&e.id) && seen.insert(e.id.clone()))
            .collect()
    }

    /// Fetch kind 0 events and keep the newest per pubkey in the cache.
    async fn fetch_profiles(
        &self,
        pubkeys: &BTreeSet<String>,
        relays: &[RelayLink],
    ) -> HashMap<String, Profile> {
        if pubkeys.is_empty() || relays.is_empty() {
            return HashMap::new();
        }

        // Relays may hold several versions of one profile, so the wire limit
        // leaves room for them and the query ends on authors covered.
        let filters = self.chunk_filters(pubkeys, |chunk| {
            let limit = (chunk.len() * PROFILE_VERSIONS_PER_AUTHOR) as u64;
            Filter::new()
                .authors(chunk)
                .kinds(vec![Kind::Profile.as_u16()])
                .limit(limit)
        });
        let events: Vec<Event> = join_all(filters.iter().map(|filter| {
            let wanted = filter.authors.as_ref().map_or(0, Vec::len);
            self.inner
                .executor
                .run_until_keys(filter, relays, wanted, |event| event.pubkey.as_str())
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let mut resolved: HashMap<String, Profile> = HashMap::new();
        for event in events {
            let profile = match Profile::from_event(&event) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!("Ignoring unreadable profile {}: {}", event.id, e);
                    continue;
                }
            };

            let mut cache = self.inner.profiles.write();
            let newer = cache
                .get(&profile.pubkey)
                .is_none_or(|cached| profile.created_at > cached.created_at);
            if newer {
                cache.insert(profile.pubkey.clone(), profile.clone());
                resolved.insert(profile.pubkey.clone(), profile);
            }
        }
        resolved
    }

    async fn fetch_reactions(
        &self,
        event_ids: &BTreeSet<String>,
        relays: &[RelayLink],
    ) -> HashMap<String, Vec<Event>> {
        let limit = self.inner.reaction_limit as u64;
        let reactions = self
            .fetch_chunked(event_ids, relays, |chunk| {
                Filter::new()
                    .kinds(vec![Kind::Reaction.as_u16()])
                    .event_refs(chunk)
                    .limit(limit)
            })
            .await;

        self.inner.reactions.merge(reactions)
    }
}
