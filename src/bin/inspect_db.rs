use lanledger::storage::Store;

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "./ledger_data".to_string());
    println!("🔍 Inspecting lanledger database at '{}'...", path);

    let db = Store::open(&path)?;

    match db.get_meta::<String>("peer_id")? {
        Some(id) => println!("🆔 Peer id: {id}"),
        None => println!("🆔 Peer id: (not yet generated)"),
    }

    let mut users = db.all_users()?;
    users.sort_by(|a, b| a.username.cmp(&b.username));
    println!("\n👥 Users ({}):", users.len());
    for user in &users {
        println!("   {:<20} {:>12.2}", user.username, user.balance);
    }

    let mut txs = db.all_transactions()?;
    txs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    println!("\n📜 Transactions ({}):", txs.len());
    for tx in &txs {
        println!(
            "   {}  {} → {}  {:.2}  {:?}  {}",
            tx.timestamp, tx.from_username, tx.to_username, tx.amount, tx.status, tx.id
        );
    }

    let total: f64 = users.iter().map(|u| u.balance).sum();
    println!("\n📈 Summary:");
    println!("   Total balance held: {total:.2}");

    db.close()
}
