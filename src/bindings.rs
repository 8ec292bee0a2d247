use alloy::sol;

sol! {
    /// Emitted by the arena contract once per finished game.
    #[derive(Debug, PartialEq, Eq)]
    event GameResult(
        uint256 gameNumber,
        string gameId,
        string startedAt,
        string winningPlayer,
        string winningClasses,
        string losingPlayer,
        string losingClasses,
        string gameLength,
        string endReason
    );
}
