//! Prompt text for the persona model.

use std::fmt::Write;

use crate::model::model_trait::ModelRequest;

const RESPONSE_FORMAT: &str = "[no prose]\n\
[Output only the move in a JSON format with key: \"move\", value: the most likely next move according to the game history]";

/// Render the instruction prompt for `request`.
///
/// Lists the player's matching games, then the legal moves (one per line,
/// sorted), then the position to move from.
pub fn build_prompt(request: &ModelRequest) -> String {
    let mut prompt = String::with_capacity(512 + 64 * request.context_games.len());
    prompt.push_str(RESPONSE_FORMAT);
    prompt.push_str("\nYou are a chess agent who can take on the persona of any player given their move history.\n");

    if request.context_games.is_empty() {
        prompt.push_str("No earlier games by this player reach the current position.\n");
    } else {
        prompt.push_str("You have been given the move history of a player who has played the following games:\n");
        for (idx, (_, moves)) in request.context_games.iter().enumerate() {
            let _ = writeln!(prompt, "Game {} = {}", idx + 1, moves);
        }
    }

    prompt.push_str("\nThese are the possible legal moves for the next move:\n");
    for mv in &request.legal_moves {
        prompt.push_str(mv);
        prompt.push('\n');
    }

    let position = if request.partial_sequence.is_empty() {
        "(starting position, no moves played)"
    } else {
        request.partial_sequence.as_str()
    };
    let _ = write!(
        prompt,
        "\nUnderstand the underlying patterns from the given game history and moves to make the best move for the state: {position}\n\
Pick exactly one of the legal moves above, copying the play style of the player.\n"
    );
    prompt
}
