mod common;

use common::run_ok;

/// The five-body solar-system simulation (Sun, Jupiter, Saturn, Uranus,
/// Neptune): initial momentum is offset onto the Sun, then 1000 leapfrog
/// steps of dt=0.01 advance the system, with total energy printed before
/// and after. Bodies are packed into a flat `array of double` (7 cells
/// each: x, y, z, vx, vy, vz, mass) rather than a class per body, so the
/// whole thing stays within ordinary array/loop/external-call codegen
/// paths.
#[test]
fn solar_system_energy_before_and_after_a_thousand_steps() {
    let src = "program NBody; \
               function sqrt(x: double): double; external; \
               var bodies: array[0..34] of double; \
               var pi, solarMass, daysPerYear: double; \
               var bi, bj, step: integer; \
               var dx, dy, dz, distance, mag: double; \
               var e, vx, vy, vz: double; \
               var px, py, pz: double; \
               begin \
               pi := 3.141592653589793; \
               solarMass := 4 * pi * pi; \
               daysPerYear := 365.24; \
               bodies[0] := 0; bodies[1] := 0; bodies[2] := 0; \
               bodies[3] := 0; bodies[4] := 0; bodies[5] := 0; \
               bodies[6] := solarMass; \
               bodies[7] := 4.84143144246472090; \
               bodies[8] := -1.16032004402742839; \
               bodies[9] := -1.03622044471123109e-01; \
               bodies[10] := 1.66007664274403694e-03 * daysPerYear; \
               bodies[11] := 7.69901118419740425e-03 * daysPerYear; \
               bodies[12] := -6.90460016972063023e-05 * daysPerYear; \
               bodies[13] := 9.54791938424326609e-04 * solarMass; \
               bodies[14] := 8.34336671824457987; \
               bodies[15] := 4.12479856412430479; \
               bodies[16] := -4.03523417114321381e-01; \
               bodies[17] := -2.76742510726862411e-03 * daysPerYear; \
               bodies[18] := 4.99852801234917238e-03 * daysPerYear; \
               bodies[19] := 2.30417297573763929e-05 * daysPerYear; \
               bodies[20] := 2.85885980666130812e-04 * solarMass; \
               bodies[21] := 1.28943695621391310e+01; \
               bodies[22] := -1.51111514016986312e+01; \
               bodies[23] := -2.23307578892655734e-01; \
               bodies[24] := 2.96460137564761618e-03 * daysPerYear; \
               bodies[25] := 2.37847173959480950e-03 * daysPerYear; \
               bodies[26] := -2.96589568540237556e-05 * daysPerYear; \
               bodies[27] := 4.36624404335156298e-05 * solarMass; \
               bodies[28] := 1.53796971148509165e+01; \
               bodies[29] := -2.59193146099879641e+01; \
               bodies[30] := 1.79258772950371181e-01; \
               bodies[31] := 2.68067772490389322e-03 * daysPerYear; \
               bodies[32] := 1.62824170038242295e-03 * daysPerYear; \
               bodies[33] := -9.51592254519715870e-05 * daysPerYear; \
               bodies[34] := 5.15138902046611451e-05 * solarMass; \
               px := 0; py := 0; pz := 0; \
               for bi := 1 to 4 do begin \
               px := px + bodies[bi * 7 + 3] * bodies[bi * 7 + 6]; \
               py := py + bodies[bi * 7 + 4] * bodies[bi * 7 + 6]; \
               pz := pz + bodies[bi * 7 + 5] * bodies[bi * 7 + 6]; \
               end; \
               bodies[3] := -px / solarMass; \
               bodies[4] := -py / solarMass; \
               bodies[5] := -pz / solarMass; \
               e := 0; \
               for bi := 0 to 4 do begin \
               vx := bodies[bi * 7 + 3]; \
               vy := bodies[bi * 7 + 4]; \
               vz := bodies[bi * 7 + 5]; \
               e := e + 0.5 * bodies[bi * 7 + 6] * (vx * vx + vy * vy + vz * vz); \
               for bj := bi + 1 to 4 do begin \
               dx := bodies[bi * 7 + 0] - bodies[bj * 7 + 0]; \
               dy := bodies[bi * 7 + 1] - bodies[bj * 7 + 1]; \
               dz := bodies[bi * 7 + 2] - bodies[bj * 7 + 2]; \
               distance := sqrt(dx * dx + dy * dy + dz * dz); \
               e := e - (bodies[bi * 7 + 6] * bodies[bj * 7 + 6]) / distance; \
               end; \
               end; \
               writeln(e); \
               for step := 1 to 1000 do begin \
               for bi := 0 to 3 do begin \
               for bj := bi + 1 to 4 do begin \
               dx := bodies[bi * 7 + 0] - bodies[bj * 7 + 0]; \
               dy := bodies[bi * 7 + 1] - bodies[bj * 7 + 1]; \
               dz := bodies[bi * 7 + 2] - bodies[bj * 7 + 2]; \
               distance := sqrt(dx * dx + dy * dy + dz * dz); \
               mag := 0.01 / (distance * distance * distance); \
               bodies[bi * 7 + 3] := bodies[bi * 7 + 3] - dx * bodies[bj * 7 + 6] * mag; \
               bodies[bi * 7 + 4] := bodies[bi * 7 + 4] - dy * bodies[bj * 7 + 6] * mag; \
               bodies[bi * 7 + 5] := bodies[bi * 7 + 5] - dz * bodies[bj * 7 + 6] * mag; \
               bodies[bj * 7 + 3] := bodies[bj * 7 + 3] + dx * bodies[bi * 7 + 6] * mag; \
               bodies[bj * 7 + 4] := bodies[bj * 7 + 4] + dy * bodies[bi * 7 + 6] * mag; \
               bodies[bj * 7 + 5] := bodies[bj * 7 + 5] + dz * bodies[bi * 7 + 6] * mag; \
               end; \
               end; \
               for bi := 0 to 4 do begin \
               bodies[bi * 7 + 0] := bodies[bi * 7 + 0] + 0.01 * bodies[bi * 7 + 3]; \
               bodies[bi * 7 + 1] := bodies[bi * 7 + 1] + 0.01 * bodies[bi * 7 + 4]; \
               bodies[bi * 7 + 2] := bodies[bi * 7 + 2] + 0.01 * bodies[bi * 7 + 5]; \
               end; \
               end; \
               e := 0; \
               for bi := 0 to 4 do begin \
               vx := bodies[bi * 7 + 3]; \
               vy := bodies[bi * 7 + 4]; \
               vz := bodies[bi * 7 + 5]; \
               e := e + 0.5 * bodies[bi * 7 + 6] * (vx * vx + vy * vy + vz * vz); \
               for bj := bi + 1 to 4 do begin \
               dx := bodies[bi * 7 + 0] - bodies[bj * 7 + 0]; \
               dy := bodies[bi * 7 + 1] - bodies[bj * 7 + 1]; \
               dz := bodies[bi * 7 + 2] - bodies[bj * 7 + 2]; \
               distance := sqrt(dx * dx + dy * dy + dz * dz); \
               e := e - (bodies[bi * 7 + 6] * bodies[bj * 7 + 6]) / distance; \
               end; \
               end; \
               writeln(e); \
               end.";

    let out = run_ok(src);
    assert_eq!(out, "-0.169075163828524\n-0.169087605234606\n");
}
