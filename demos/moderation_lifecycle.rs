use chrono::{Duration, Utc};
use warden::moderation::{
    Case, CaseKind, Escalation, ModerationStore, NormalizedContent, PERMANENT, RateLimiter,
    UnmuteScheduler, decide,
};

#[tokio::main]
async fn main() {
    println!("Moderation Lifecycle Test");
    println!("-------------------------");

    let store = ModerationStore::new();
    let guild_id = 67890;
    let user_id = 12345;
    let moderator_id = 54321;

    // 1. Issue a couple of warns and watch the points accumulate
    println!("\n--- Warning a user ---");
    for (points, reason) in [(200_u64, "spamming"), (150, "more spamming")] {
        let case_id = store.next_case_id(guild_id).await.unwrap();
        let case = Case::new(
            case_id,
            guild_id,
            CaseKind::Warn,
            user_id,
            moderator_id,
            "mod#1",
            reason,
        )
        .with_punishment(points.to_string());
        store.add_case(case).await.unwrap();
        let total = store.adjust_points(user_id, points as i64).await.unwrap();
        println!("Case #{case_id}: warned {points} points, total {total}");
    }

    // 2. Ask the escalation policy what should happen at each total
    println!("\n--- Escalation decisions ---");
    let state = store.user_state(user_id);
    for total in [350_u64, 450, 650] {
        let decision = decide(total, state.was_warn_kicked, true);
        println!("{total} points -> {decision:?}");
    }
    let after_kick = decide(450, true, true);
    println!("450 points after a warn kick -> {after_kick:?} (threshold fires once)");
    assert_eq!(after_kick, Escalation::None);

    // 3. Lift the second warn and get its points back
    println!("\n--- Lifting a warn ---");
    let lifted = store
        .lift_warn(user_id, 2, moderator_id, "mod#1", "appealed")
        .await
        .unwrap();
    let points = lifted.warn_points().unwrap();
    let total = store.adjust_points(user_id, -(points as i64)).await.unwrap();
    println!("Case #2 lifted, {points} points returned, total {total}");

    // 4. A timed mute whose unmute timer really fires
    println!("\n--- Timed mute ---");
    let scheduler = UnmuteScheduler::new();
    let case_id = store.next_case_id(guild_id).await.unwrap();
    let fire_at = Utc::now() + Duration::seconds(2);
    let case = Case::new(
        case_id,
        guild_id,
        CaseKind::Mute,
        user_id,
        moderator_id,
        "mod#1",
        "being loud",
    )
    .with_expiry(fire_at)
    .with_punishment("2 seconds");
    store.add_case(case).await.unwrap();
    store.set_muted(user_id, true).await.unwrap();

    let unmute_store = store.clone();
    scheduler.schedule(user_id, fire_at, move || async move {
        unmute_store.set_muted(user_id, false).await.unwrap();
        println!("Timer fired: user unmuted");
    });
    println!(
        "Muted until {fire_at}, scheduled: {}",
        scheduler.is_scheduled(user_id)
    );

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    println!("Still muted: {}", store.is_muted(user_id));

    // 5. A permanent mute has no expiry and nothing to schedule
    println!("\n--- Permanent mute ---");
    let case_id = store.next_case_id(guild_id).await.unwrap();
    let case = Case::new(
        case_id,
        guild_id,
        CaseKind::Mute,
        99999,
        moderator_id,
        "mod#1",
        "for good",
    )
    .with_punishment(PERMANENT);
    store.add_case(case).await.unwrap();
    store.set_muted(99999, true).await.unwrap();
    println!(
        "Deadlines needing restoration: {:?}",
        store.scheduled_unmutes(guild_id)
    );

    // 6. Fixed-window rate limiting with the boundary burst
    println!("\n--- Rate limiter ---");
    let limiter = RateLimiter::new(3, 15);
    let start = Utc::now();
    for i in 0..4 {
        let allowed = limiter.try_acquire_at(1, start + Duration::seconds(i));
        println!("request {} at +{i}s -> {allowed}", i + 1);
    }
    let next_window = limiter.try_acquire_at(1, start + Duration::seconds(16));
    println!("request at +16s (new window) -> {next_window}");

    // 7. Homoglyph folding used by the content filter
    println!("\n--- Content normalization ---");
    let tricky = "frЕЕ stuff";
    let normalized = NormalizedContent::new(tricky);
    println!("raw:     {tricky}");
    println!("folded:  {}", normalized.folded);
    println!("compact: {}", normalized.spaceless);

    println!("\nDone.");
}
